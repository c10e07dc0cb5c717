//! Persisted recording format for a land session
//!
//! A recording is one [`RecordingMetadata`] record followed by one
//! [`RecordingFrame`] per executed tick. Two encodings are understood:
//!
//! - the whole-document form `{ "metadata": {...}, "frames": [...] }`
//! - the append-friendly JSON-lines form: metadata on the first line,
//!   one frame per following line
//!
//! Frames start at tick 0 and ascend by tick id with no gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::target::EventTargetRecord;

/// Who caused an item. All three fields are independently optional; all of
/// them are absent for pre-join lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorIdentity {
    #[serde(rename = "playerID", default)]
    pub player_id: Option<String>,
    #[serde(rename = "clientID", default)]
    pub client_id: Option<String>,
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<String>,
}

impl ActorIdentity {
    pub fn new(
        player_id: impl Into<String>,
        client_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            player_id: Some(player_id.into()),
            client_id: Some(client_id.into()),
            session_id: Some(session_id.into()),
        }
    }

    /// Identity with only a player id
    pub fn player(player_id: impl Into<String>) -> Self {
        Self {
            player_id: Some(player_id.into()),
            ..Self::default()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.player_id.is_none() && self.client_id.is_none() && self.session_id.is_none()
    }
}

/// Captured output of one resolver, tagged with the type it was produced as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedResolverOutput {
    pub type_identifier: String,
    pub value: Value,
}

/// Resolver outputs keyed by logical output name
pub type ResolverOutputs = BTreeMap<String, RecordedResolverOutput>;

/// Kind tag carried by recorded actions, client events and server events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Action,
    ClientEvent,
    ServerEvent,
}

/// Kind tag of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleKind {
    Join,
    Leave,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::Join => "join",
            LifecycleKind::Leave => "leave",
        }
    }
}

/// An executed action or client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedInput {
    pub kind: RecordKind,
    pub sequence: u64,
    pub type_identifier: String,
    pub payload: Value,
    #[serde(flatten)]
    pub actor: ActorIdentity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolver_outputs: ResolverOutputs,
    pub resolved_at_tick: u64,
}

pub type RecordedAction = RecordedInput;
pub type RecordedClientEvent = RecordedInput;

/// An executed join or leave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedLifecycleEvent {
    pub kind: LifecycleKind,
    pub sequence: u64,
    pub tick_id: u64,
    #[serde(flatten)]
    pub actor: ActorIdentity,
    #[serde(rename = "deviceID", default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub is_guest: Option<bool>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolver_outputs: ResolverOutputs,
    pub resolved_at_tick: u64,
}

/// Outbound event tap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedServerEvent {
    pub kind: RecordKind,
    pub sequence: u64,
    pub tick_id: u64,
    pub type_identifier: String,
    pub payload: Value,
    pub target: EventTargetRecord,
}

/// Everything that happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFrame {
    pub tick_id: u64,
    #[serde(default)]
    pub actions: Vec<RecordedAction>,
    #[serde(default)]
    pub client_events: Vec<RecordedClientEvent>,
    #[serde(default)]
    pub server_events: Vec<RecordedServerEvent>,
    #[serde(default)]
    pub lifecycle_events: Vec<RecordedLifecycleEvent>,
    /// Hash of the land state after this tick was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
}

impl RecordingFrame {
    pub fn empty(tick_id: u64) -> Self {
        Self {
            tick_id,
            ..Self::default()
        }
    }

    /// Number of inbound items executed during this tick
    pub fn item_count(&self) -> usize {
        self.actions.len() + self.client_events.len() + self.lifecycle_events.len()
    }
}

/// Land identity and creation context, written once before any frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    #[serde(rename = "landID")]
    pub land_id: String,
    pub land_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(rename = "landDefinitionID", default)]
    pub land_definition_id: Option<String>,
    #[serde(default)]
    pub initial_state_hash: Option<String>,
    #[serde(default)]
    pub land_config: Option<Value>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

impl RecordingMetadata {
    pub fn new(land_id: impl Into<String>, land_type: impl Into<String>) -> Self {
        Self {
            land_id: land_id.into(),
            land_type: land_type.into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
            land_definition_id: None,
            initial_state_hash: None,
            land_config: None,
            version: Some(crate::RECORDING_FORMAT_VERSION.to_string()),
            extensions: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordingFormatError {
    #[error("recording is empty")]
    Empty,
    #[error("malformed recording at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame gap: expected tick {expected}, found tick {found}")]
    Gap { expected: u64, found: u64 },
    #[error("invalid target in server event {sequence}: {reason}")]
    Target { sequence: u64, reason: String },
}

/// The full persisted artifact for one land session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingFile {
    pub metadata: RecordingMetadata,
    #[serde(default)]
    pub frames: Vec<RecordingFrame>,
}

impl RecordingFile {
    pub fn new(metadata: RecordingMetadata) -> Self {
        Self {
            metadata,
            frames: Vec::new(),
        }
    }

    /// Parses either encoding and validates frame ordering
    pub fn parse(text: &str) -> Result<Self, RecordingFormatError> {
        let trimmed = text.trim_start();
        if trimmed.is_empty() {
            return Err(RecordingFormatError::Empty);
        }

        let file = match serde_json::from_str::<RecordingFile>(trimmed) {
            Ok(file) => file,
            Err(whole_doc_err) => {
                // JSON-lines recordings open with a complete metadata object
                // on their first line.
                let first_line = trimmed.lines().next().unwrap_or_default();
                let is_json_lines = serde_json::from_str::<Value>(first_line).is_ok();
                if !is_json_lines {
                    return Err(RecordingFormatError::Json {
                        line: whole_doc_err.line(),
                        source: whole_doc_err,
                    });
                }
                Self::parse_lines(text)?
            }
        };

        file.validate()?;
        Ok(file)
    }

    fn parse_lines(text: &str) -> Result<Self, RecordingFormatError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (index, first) = lines.next().ok_or(RecordingFormatError::Empty)?;
        let metadata = serde_json::from_str::<RecordingMetadata>(first)
            .map_err(|source| RecordingFormatError::Json {
                line: index + 1,
                source,
            })?;

        let mut file = RecordingFile::new(metadata);
        for (index, line) in lines {
            let frame = serde_json::from_str::<RecordingFrame>(line)
                .map_err(|source| RecordingFormatError::Json {
                    line: index + 1,
                    source,
                })?;
            file.frames.push(frame);
        }
        Ok(file)
    }

    /// Checks that frames start at tick 0 and ascend by exactly one tick,
    /// and that targets are well formed
    pub fn validate(&self) -> Result<(), RecordingFormatError> {
        let mut expected = 0;
        for frame in &self.frames {
            if frame.tick_id != expected {
                return Err(RecordingFormatError::Gap {
                    expected,
                    found: frame.tick_id,
                });
            }
            for event in &frame.server_events {
                crate::EventTarget::try_from(event.target.clone()).map_err(|e| {
                    RecordingFormatError::Target {
                        sequence: event.sequence,
                        reason: e.to_string(),
                    }
                })?;
            }
            expected = frame.tick_id + 1;
        }
        Ok(())
    }

    pub fn max_tick_id(&self) -> Option<u64> {
        self.frames.last().map(|frame| frame.tick_id)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
