//! UDP transport in front of a running land
//!
//! Clients join, submit actions and client events, and receive the server
//! events the land emits. The land runs on its own task; this layer only
//! translates packets into submissions and delivers outbound events to the
//! addresses their targets resolve to.

use crate::client_manager::{ClientManager, Session};
use crate::error::LandError;
use crate::land::LandHandle;
use crate::pending::{Inbound, LifecycleEvent};
use crate::registry::OutboundEvent;
use crate::tick::EventSink;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ActorIdentity, LifecycleKind, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { session: Session },
    Shutdown,
}

/// Messages handled by the outbound sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    /// A server event emitted by the land during a tick
    Deliver { tick_id: u64, event: OutboundEvent },
}

/// Builds the land input for a client submission
pub fn to_inbound(
    type_identifier: String,
    payload_json: &str,
    actor: ActorIdentity,
    client_event: bool,
) -> Result<Inbound, serde_json::Error> {
    let payload = serde_json::from_str(payload_json)?;
    Ok(if client_event {
        Inbound::ClientEvent {
            type_identifier,
            payload,
            actor,
        }
    } else {
        Inbound::Action {
            type_identifier,
            payload,
            actor,
        }
    })
}

pub fn server_event_packet(tick_id: u64, event: &OutboundEvent) -> Packet {
    Packet::ServerEvent {
        tick_id,
        type_identifier: event.type_identifier.clone(),
        payload_json: event.payload.to_string(),
    }
}

/// Transport coordinating the socket, connected clients and a land
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn new(addr: &str, max_clients: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender the main loop can be stopped through
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Sink to install on the land so its server events reach clients
    pub fn event_sink(&self) -> EventSink {
        let outbound_tx = self.outbound_tx.clone();
        Box::new(move |tick_id, event| {
            if outbound_tx
                .send(OutboundMessage::Deliver {
                    tick_id,
                    event: event.clone(),
                })
                .is_err()
            {
                debug!("Transport stopped; dropping {}", event.type_identifier);
            }
        })
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packets and land events
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::Deliver { tick_id, event } => {
                        let addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.addrs_for(&event.target)
                        };
                        let packet = server_event_packet(tick_id, &event);

                        for addr in addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!(
                                    "Failed to deliver {} to {}: {}",
                                    event.type_identifier, addr, e
                                );
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for session in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { session }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Waits for the land's acknowledgment off the main loop and reports it
    /// back to the client
    fn forward_ack(
        &self,
        request_id: u32,
        addr: SocketAddr,
        ack: oneshot::Receiver<Result<u64, LandError>>,
    ) {
        let outbound_tx = self.outbound_tx.clone();
        tokio::spawn(async move {
            let packet = match ack.await {
                Ok(Ok(sequence)) => Packet::Ack {
                    request_id,
                    sequence,
                },
                Ok(Err(e)) => Packet::Rejected {
                    request_id,
                    reason: e.to_string(),
                },
                Err(_) => Packet::Rejected {
                    request_id,
                    reason: LandError::LandClosed.to_string(),
                },
            };
            if outbound_tx
                .send(OutboundMessage::SendPacket { packet, addr })
                .is_err()
            {
                debug!("Transport stopped before ack for request {}", request_id);
            }
        });
    }

    fn submit_leave(&self, land: &LandHandle, identity: ActorIdentity) {
        let player = identity.player_id.clone().unwrap_or_default();
        match land.enqueue(Inbound::Lifecycle {
            kind: LifecycleKind::Leave,
            actor: identity,
            event: LifecycleEvent::default(),
        }) {
            Ok(ack) => {
                tokio::spawn(async move {
                    if let Ok(Err(e)) = ack.await {
                        warn!("Leave for player {} rejected: {}", player, e);
                    }
                });
            }
            Err(e) => error!("Could not submit leave for player {}: {}", player, e),
        }
    }

    /// Translates one packet into land submissions and replies
    async fn handle_packet(&mut self, land: &LandHandle, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                client_version,
                player_id,
                device_id,
                is_guest,
                metadata,
            } => {
                info!(
                    "Player {} joining from {} (version: {})",
                    player_id, addr, client_version
                );
                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: format!("Unsupported client version {}", client_version),
                        },
                        addr,
                    );
                    return;
                }

                // Replace an existing connection from the same address
                let existing = self.clients.write().await.remove_client(addr);
                if let Some(session) = existing {
                    self.submit_leave(land, session.identity);
                }

                let identity = self.clients.write().await.add_client(addr, &player_id);
                let Some(identity) = identity else {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full or player already connected".to_string(),
                        },
                        addr,
                    );
                    return;
                };

                let join = Inbound::Lifecycle {
                    kind: LifecycleKind::Join,
                    actor: identity.clone(),
                    event: LifecycleEvent {
                        device_id,
                        is_guest: Some(is_guest),
                        metadata,
                    },
                };
                let ack = match land.enqueue(join) {
                    Ok(ack) => ack,
                    Err(e) => {
                        self.clients.write().await.remove_client(addr);
                        self.send_packet(Packet::Disconnected { reason: e.to_string() }, addr);
                        return;
                    }
                };

                let clients = Arc::clone(&self.clients);
                let outbound_tx = self.outbound_tx.clone();
                tokio::spawn(async move {
                    let packet = match ack.await {
                        Ok(Ok(_)) => Packet::Joined {
                            player_id: identity.player_id.unwrap_or_default(),
                            client_id: identity.client_id.unwrap_or_default(),
                            session_id: identity.session_id.unwrap_or_default(),
                        },
                        Ok(Err(e)) => {
                            clients.write().await.remove_client(addr);
                            Packet::Disconnected {
                                reason: e.to_string(),
                            }
                        }
                        Err(_) => Packet::Disconnected {
                            reason: LandError::LandClosed.to_string(),
                        },
                    };
                    if outbound_tx
                        .send(OutboundMessage::SendPacket { packet, addr })
                        .is_err()
                    {
                        debug!("Transport stopped before join reply to {}", addr);
                    }
                });
            }

            Packet::Action {
                request_id,
                type_identifier,
                payload_json,
            } => {
                self.handle_submission(
                    land,
                    addr,
                    request_id,
                    type_identifier,
                    &payload_json,
                    false,
                )
                .await;
            }

            Packet::ClientEvent {
                request_id,
                type_identifier,
                payload_json,
            } => {
                self.handle_submission(
                    land,
                    addr,
                    request_id,
                    type_identifier,
                    &payload_json,
                    true,
                )
                .await;
            }

            Packet::Heartbeat => {
                self.clients.write().await.touch(addr);
            }

            Packet::Leave => {
                let session = self.clients.write().await.remove_client(addr);
                if let Some(session) = session {
                    self.submit_leave(land, session.identity);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_submission(
        &mut self,
        land: &LandHandle,
        addr: SocketAddr,
        request_id: u32,
        type_identifier: String,
        payload_json: &str,
        client_event: bool,
    ) {
        let identity = {
            let mut clients = self.clients.write().await;
            if !clients.touch(addr) {
                None
            } else {
                clients.find_by_addr(addr).map(|session| session.identity.clone())
            }
        };
        let Some(identity) = identity else {
            warn!("Submission from unknown client at {}", addr);
            self.send_packet(
                Packet::Rejected {
                    request_id,
                    reason: "Not joined".to_string(),
                },
                addr,
            );
            return;
        };

        let inbound = match to_inbound(type_identifier, payload_json, identity, client_event) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.send_packet(
                    Packet::Rejected {
                        request_id,
                        reason: format!("Malformed payload: {}", e),
                    },
                    addr,
                );
                return;
            }
        };

        match land.enqueue(inbound) {
            Ok(ack) => self.forward_ack(request_id, addr, ack),
            Err(e) => self.send_packet(
                Packet::Rejected {
                    request_id,
                    reason: e.to_string(),
                },
                addr,
            ),
        }
    }

    /// Main server loop; returns once asked to stop or interrupted
    pub async fn run(&mut self, land: LandHandle) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(&land, packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { session }) => {
                            info!("Player {} timed out", session.player_id());
                            self.submit_leave(&land, session.identity);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                },
            }
        }

        let disconnected: Vec<SocketAddr> = {
            let clients = self.clients.read().await;
            clients.addrs_for(&shared::EventTarget::All)
        };
        for addr in disconnected {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Server shutting down".to_string(),
                },
                addr,
            );
        }

        match land.shutdown().await {
            Ok(Some(report)) => info!(
                "Recording flushed: {} frames in {} flushes",
                report.frames_written, report.flushes
            ),
            Ok(None) => {}
            Err(e) => error!("Land shutdown failed: {}", e),
        }
        Ok(())
    }
}
