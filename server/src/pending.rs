//! Pending items and the ordered queue they wait in until their tick.
//!
//! An inbound submission becomes a [`Submission`] once it has a sequence
//! number, and a [`PendingItem`] only once resolution is complete and a
//! `resolved_at_tick` has been assigned. The queue therefore never holds an
//! item that is still resolving.

use serde_json::Value;
use shared::{
    ActorIdentity, LifecycleKind, RecordKind, RecordedInput, RecordedLifecycleEvent,
    ResolverOutputs,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::oneshot;

use crate::error::LandError;

/// Channel on which a submitter receives its acknowledgment
pub type AckSender = oneshot::Sender<Result<u64, LandError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Action,
    ClientEvent,
    Lifecycle(LifecycleKind),
}

impl ItemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Action => "action",
            ItemKind::ClientEvent => "client event",
            ItemKind::Lifecycle(kind) => kind.as_str(),
        }
    }
}

/// Connection details attached to join and leave events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleEvent {
    pub device_id: Option<String>,
    pub is_guest: Option<bool>,
    pub metadata: BTreeMap<String, String>,
}

/// What an external caller hands to the land
#[derive(Debug, Clone)]
pub enum Inbound {
    Action {
        type_identifier: String,
        payload: Value,
        actor: ActorIdentity,
    },
    ClientEvent {
        type_identifier: String,
        payload: Value,
        actor: ActorIdentity,
    },
    Lifecycle {
        kind: LifecycleKind,
        actor: ActorIdentity,
        event: LifecycleEvent,
    },
}

impl Inbound {
    pub fn kind(&self) -> ItemKind {
        match self {
            Inbound::Action { .. } => ItemKind::Action,
            Inbound::ClientEvent { .. } => ItemKind::ClientEvent,
            Inbound::Lifecycle { kind, .. } => ItemKind::Lifecycle(*kind),
        }
    }

    pub fn type_identifier(&self) -> &str {
        match self {
            Inbound::Action {
                type_identifier, ..
            }
            | Inbound::ClientEvent {
                type_identifier, ..
            } => type_identifier,
            Inbound::Lifecycle { kind, .. } => kind.as_str(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Inbound::Action { .. } => "submit_action",
            Inbound::ClientEvent { .. } => "submit_client_event",
            Inbound::Lifecycle { .. } => "submit_lifecycle_event",
        }
    }

    /// Attaches a sequence number
    pub fn into_submission(self, sequence: u64) -> Submission {
        let kind = self.kind();
        let (type_identifier, payload, actor, lifecycle) = match self {
            Inbound::Action {
                type_identifier,
                payload,
                actor,
            }
            | Inbound::ClientEvent {
                type_identifier,
                payload,
                actor,
            } => (type_identifier, payload, actor, None),
            Inbound::Lifecycle { kind, actor, event } => {
                (kind.as_str().to_string(), Value::Null, actor, Some(event))
            }
        };
        Submission {
            kind,
            sequence,
            type_identifier,
            payload,
            actor,
            lifecycle,
        }
    }
}

/// A sequenced item whose resolution has not finished yet
#[derive(Debug, Clone)]
pub struct Submission {
    pub kind: ItemKind,
    pub sequence: u64,
    pub type_identifier: String,
    pub payload: Value,
    pub actor: ActorIdentity,
    pub lifecycle: Option<LifecycleEvent>,
}

impl Submission {
    /// Marks resolution complete; the item is eligible from `tick_id` on
    pub fn resolve(self, resolver_outputs: ResolverOutputs, tick_id: u64) -> PendingItem {
        PendingItem {
            kind: self.kind,
            sequence: self.sequence,
            type_identifier: self.type_identifier,
            payload: self.payload,
            actor: self.actor,
            lifecycle: self.lifecycle,
            resolver_outputs,
            resolved_at_tick: tick_id,
        }
    }
}

/// A unit of work awaiting execution
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub kind: ItemKind,
    pub sequence: u64,
    pub type_identifier: String,
    pub payload: Value,
    pub actor: ActorIdentity,
    pub lifecycle: Option<LifecycleEvent>,
    pub resolver_outputs: ResolverOutputs,
    pub resolved_at_tick: u64,
}

/// Persisted counterpart of an executed item
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedItem {
    Action(RecordedInput),
    ClientEvent(RecordedInput),
    Lifecycle(RecordedLifecycleEvent),
}

impl PendingItem {
    pub fn order_key(&self) -> (u64, u64) {
        (self.resolved_at_tick, self.sequence)
    }

    /// Converts an item executed during `tick_id` into its recorded form
    pub fn into_record(self, tick_id: u64) -> RecordedItem {
        match self.kind {
            ItemKind::Action | ItemKind::ClientEvent => {
                let record = RecordedInput {
                    kind: if self.kind == ItemKind::Action {
                        RecordKind::Action
                    } else {
                        RecordKind::ClientEvent
                    },
                    sequence: self.sequence,
                    type_identifier: self.type_identifier,
                    payload: self.payload,
                    actor: self.actor,
                    resolver_outputs: self.resolver_outputs,
                    resolved_at_tick: self.resolved_at_tick,
                };
                if self.kind == ItemKind::Action {
                    RecordedItem::Action(record)
                } else {
                    RecordedItem::ClientEvent(record)
                }
            }
            ItemKind::Lifecycle(kind) => {
                let event = self.lifecycle.unwrap_or_default();
                RecordedItem::Lifecycle(RecordedLifecycleEvent {
                    kind,
                    sequence: self.sequence,
                    tick_id,
                    actor: self.actor,
                    device_id: event.device_id,
                    is_guest: event.is_guest,
                    metadata: event.metadata,
                    resolver_outputs: self.resolver_outputs,
                    resolved_at_tick: self.resolved_at_tick,
                })
            }
        }
    }

    /// Rebuilds an action or client event from a recording
    pub fn from_recorded_input(record: &RecordedInput) -> Self {
        let kind = match record.kind {
            RecordKind::ClientEvent => ItemKind::ClientEvent,
            _ => ItemKind::Action,
        };
        PendingItem {
            kind,
            sequence: record.sequence,
            type_identifier: record.type_identifier.clone(),
            payload: record.payload.clone(),
            actor: record.actor.clone(),
            lifecycle: None,
            resolver_outputs: record.resolver_outputs.clone(),
            resolved_at_tick: record.resolved_at_tick,
        }
    }

    pub fn from_recorded_lifecycle(record: &RecordedLifecycleEvent) -> Self {
        PendingItem {
            kind: ItemKind::Lifecycle(record.kind),
            sequence: record.sequence,
            type_identifier: record.kind.as_str().to_string(),
            payload: Value::Null,
            actor: record.actor.clone(),
            lifecycle: Some(LifecycleEvent {
                device_id: record.device_id.clone(),
                is_guest: record.is_guest,
                metadata: record.metadata.clone(),
            }),
            resolver_outputs: record.resolver_outputs.clone(),
            resolved_at_tick: record.resolved_at_tick,
        }
    }
}

/// Items waiting for their tick, ordered by `(resolved_at_tick, sequence)`
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: BTreeMap<(u64, u64), PendingItem>,
    sequences: BTreeSet<u64>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resolved item. Returns false if its sequence is already queued.
    pub fn push(&mut self, item: PendingItem) -> bool {
        if !self.sequences.insert(item.sequence) {
            return false;
        }
        self.items.insert(item.order_key(), item);
        true
    }

    /// Removes and returns every item with `resolved_at_tick < next_tick_id`,
    /// in execution order
    pub fn drain(&mut self, next_tick_id: u64) -> Vec<PendingItem> {
        let later = self.items.split_off(&(next_tick_id, 0));
        let ready = std::mem::replace(&mut self.items, later);
        ready
            .into_values()
            .inspect(|item| {
                self.sequences.remove(&item.sequence);
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
