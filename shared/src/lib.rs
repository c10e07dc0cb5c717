//! Types shared between the land server and its clients: the recording
//! file format, event targets and the UDP wire packets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod recording;
pub mod target;

pub use recording::{
    ActorIdentity, LifecycleKind, RecordKind, RecordedAction, RecordedClientEvent, RecordedInput,
    RecordedLifecycleEvent, RecordedResolverOutput, RecordedServerEvent, RecordingFile,
    RecordingFormatError, RecordingFrame, RecordingMetadata, ResolverOutputs,
};
pub use target::{EventTarget, EventTargetRecord, TargetCase, TargetError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const RECORDING_FORMAT_VERSION: &str = "1";

/// Packets exchanged over UDP. Payloads travel as JSON text since the
/// handlers on the server decode them by type identifier.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Join {
        client_version: u32,
        player_id: String,
        device_id: Option<String>,
        is_guest: bool,
        metadata: BTreeMap<String, String>,
    },
    Action {
        request_id: u32,
        type_identifier: String,
        payload_json: String,
    },
    ClientEvent {
        request_id: u32,
        type_identifier: String,
        payload_json: String,
    },
    Heartbeat,
    Leave,

    Joined {
        player_id: String,
        client_id: String,
        session_id: String,
    },
    Ack {
        request_id: u32,
        sequence: u64,
    },
    Rejected {
        request_id: u32,
        reason: String,
    },
    ServerEvent {
        tick_id: u64,
        type_identifier: String,
        payload_json: String,
    },
    Disconnected {
        reason: String,
    },
}
