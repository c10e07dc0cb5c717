//! Connected-client bookkeeping for the UDP transport
//!
//! This module tracks which address belongs to which player and session:
//! - Session lifecycle (join, leave, timeout)
//! - Identity assignment (client and session ids) for the land's actor triple
//! - Resolution of server event targets to the addresses that receive them
//!
//! The land itself never sees addresses; it only sees the [`ActorIdentity`]
//! attached to each submission.

use log::info;
use shared::{ActorIdentity, EventTarget};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::utils::get_timestamp;

/// Default silence after which a client is considered gone
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connected client
#[derive(Debug, Clone)]
pub struct Session {
    /// Identity attached to everything this client submits
    pub identity: ActorIdentity,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Session {
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn player_id(&self) -> &str {
        self.identity.player_id.as_deref().unwrap_or_default()
    }
}

/// Manages all connected clients, keyed by address
///
/// Enforces the capacity limit and hands out client ids that are unique for
/// the lifetime of the server. Session ids additionally carry the join time
/// so that a reconnecting player never reuses a session id.
pub struct ClientManager {
    sessions: HashMap<SocketAddr, Session>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, CLIENT_TIMEOUT)
    }

    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Registers a joining client
    ///
    /// Returns the identity assigned to the client, or `None` if the server
    /// is at capacity or the player is already connected from elsewhere.
    pub fn add_client(&mut self, addr: SocketAddr, player_id: &str) -> Option<ActorIdentity> {
        if self.sessions.len() >= self.max_clients {
            return None;
        }
        if self.find_by_player(player_id).is_some() {
            return None;
        }

        let client_number = self.next_client_id;
        self.next_client_id += 1;

        let identity = ActorIdentity::new(
            player_id,
            format!("c{}", client_number),
            format!("s{}-{}", get_timestamp(), client_number),
        );
        info!(
            "Player {} connected from {} as client c{}",
            player_id, addr, client_number
        );
        self.sessions.insert(
            addr,
            Session {
                identity: identity.clone(),
                addr,
                last_seen: Instant::now(),
            },
        );
        Some(identity)
    }

    /// Removes a client. Returns its session if it was connected.
    pub fn remove_client(&mut self, addr: SocketAddr) -> Option<Session> {
        let session = self.sessions.remove(&addr)?;
        info!("Player {} disconnected", session.player_id());
        Some(session)
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<&Session> {
        self.sessions.get(&addr)
    }

    pub fn find_by_player(&self, player_id: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| session.identity.player_id.as_deref() == Some(player_id))
    }

    /// Records activity from `addr`. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.sessions.get_mut(&addr) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes and returns clients silent for longer than the timeout
    pub fn check_timeouts(&mut self) -> Vec<Session> {
        let timeout = self.timeout;
        let timed_out: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.addr)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|addr| self.remove_client(addr))
            .collect()
    }

    /// Addresses of every connected client the target includes
    pub fn addrs_for(&self, target: &EventTarget) -> Vec<SocketAddr> {
        self.sessions
            .values()
            .filter(|session| target.includes(&session.identity))
            .map(|session| session.addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_add_client_assigns_identity() {
        let mut manager = ClientManager::new(2);
        let identity = manager.add_client(test_addr(), "p1").unwrap();

        assert_eq!(identity.player_id.as_deref(), Some("p1"));
        assert_eq!(identity.client_id.as_deref(), Some("c1"));
        assert!(identity.session_id.as_deref().unwrap().ends_with("-1"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_capacity_and_duplicate_player() {
        let mut manager = ClientManager::new(1);
        assert!(manager.add_client(test_addr(), "p1").is_some());
        assert!(manager.add_client(test_addr2(), "p2").is_none());

        let mut manager = ClientManager::new(5);
        assert!(manager.add_client(test_addr(), "p1").is_some());
        assert!(manager.add_client(test_addr2(), "p1").is_none());
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new(2);
        manager.add_client(test_addr(), "p1").unwrap();

        let session = manager.remove_client(test_addr()).unwrap();
        assert_eq!(session.player_id(), "p1");
        assert!(manager.is_empty());
        assert!(manager.remove_client(test_addr()).is_none());
    }

    #[test]
    fn test_timeouts_remove_silent_clients() {
        let mut manager = ClientManager::with_timeout(2, Duration::from_secs(1));
        manager.add_client(test_addr(), "p1").unwrap();
        manager.add_client(test_addr2(), "p2").unwrap();

        if let Some(session) = manager.sessions.get_mut(&test_addr()) {
            session.last_seen = Instant::now() - Duration::from_secs(2);
        }

        let timed_out = manager.check_timeouts();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].player_id(), "p1");
        assert_eq!(manager.len(), 1);
        assert!(manager.touch(test_addr2()));
        assert!(!manager.touch(test_addr()));
    }

    #[test]
    fn test_targets_resolve_to_addresses() {
        let mut manager = ClientManager::new(3);
        let p1 = manager.add_client(test_addr(), "p1").unwrap();
        manager.add_client(test_addr2(), "p2").unwrap();

        assert_eq!(manager.addrs_for(&EventTarget::All).len(), 2);
        assert_eq!(
            manager.addrs_for(&EventTarget::Player("p2".to_string())),
            vec![test_addr2()]
        );
        assert_eq!(
            manager.addrs_for(&EventTarget::Client(p1.client_id.unwrap())),
            vec![test_addr()]
        );
        let mut both =
            manager.addrs_for(&EventTarget::Players(vec!["p1".to_string(), "p2".to_string()]));
        both.sort();
        assert_eq!(both, vec![test_addr(), test_addr2()]);
        assert!(manager
            .addrs_for(&EventTarget::Session("missing".to_string()))
            .is_empty());
    }
}
