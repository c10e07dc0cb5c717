//! Addressing for outbound server events.
//!
//! [`EventTarget`] is what handlers use when emitting; [`EventTargetRecord`]
//! is its flat, persisted `{ "case": ..., "ids": [...] }` form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recording::ActorIdentity;

/// Who receives a server event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    All,
    Player(String),
    Client(String),
    Session(String),
    Players(Vec<String>),
}

impl EventTarget {
    /// Returns true if a connection with the given identity should receive the event
    pub fn includes(&self, actor: &ActorIdentity) -> bool {
        match self {
            EventTarget::All => true,
            EventTarget::Player(id) => actor.player_id.as_deref() == Some(id.as_str()),
            EventTarget::Client(id) => actor.client_id.as_deref() == Some(id.as_str()),
            EventTarget::Session(id) => actor.session_id.as_deref() == Some(id.as_str()),
            EventTarget::Players(ids) => actor
                .player_id
                .as_ref()
                .map(|player| ids.contains(player))
                .unwrap_or(false),
        }
    }
}

/// Discriminant of a persisted target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetCase {
    All,
    Player,
    Client,
    Session,
    Players,
}

/// Persisted form of an [`EventTarget`]
///
/// `ids` is empty for `all`, holds exactly one id for the singular cases
/// and at least one id for `players`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTargetRecord {
    pub case: TargetCase,
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target case {case:?} expects {expected} id(s), found {found}")]
    IdCount {
        case: TargetCase,
        expected: &'static str,
        found: usize,
    },
}

impl From<&EventTarget> for EventTargetRecord {
    fn from(target: &EventTarget) -> Self {
        let (case, ids) = match target {
            EventTarget::All => (TargetCase::All, Vec::new()),
            EventTarget::Player(id) => (TargetCase::Player, vec![id.clone()]),
            EventTarget::Client(id) => (TargetCase::Client, vec![id.clone()]),
            EventTarget::Session(id) => (TargetCase::Session, vec![id.clone()]),
            EventTarget::Players(ids) => (TargetCase::Players, ids.clone()),
        };
        EventTargetRecord { case, ids }
    }
}

impl TryFrom<EventTargetRecord> for EventTarget {
    type Error = TargetError;

    fn try_from(record: EventTargetRecord) -> Result<Self, Self::Error> {
        let EventTargetRecord { case, mut ids } = record;
        let found = ids.len();
        match case {
            TargetCase::All if ids.is_empty() => Ok(EventTarget::All),
            TargetCase::All => Err(TargetError::IdCount {
                case,
                expected: "0",
                found,
            }),
            TargetCase::Players if !ids.is_empty() => Ok(EventTarget::Players(ids)),
            TargetCase::Players => Err(TargetError::IdCount {
                case,
                expected: "1 or more",
                found,
            }),
            TargetCase::Player | TargetCase::Client | TargetCase::Session => {
                if found != 1 {
                    return Err(TargetError::IdCount {
                        case,
                        expected: "1",
                        found,
                    });
                }
                let id = ids.remove(0);
                Ok(match case {
                    TargetCase::Player => EventTarget::Player(id),
                    TargetCase::Client => EventTarget::Client(id),
                    _ => EventTarget::Session(id),
                })
            }
        }
    }
}
