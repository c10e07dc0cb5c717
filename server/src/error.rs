//! Error taxonomy for the land runtime

use shared::{LifecycleKind, RecordingFormatError};
use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures of the recording storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("recording could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Format(#[from] RecordingFormatError),
    #[error("storage rejected write: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum LandError {
    #[error("{operation} is not available while the land is in {mode} mode")]
    ModeViolation {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("resolver '{resolver}' failed: {reason}")]
    ResolverFailure { resolver: String, reason: String },

    #[error("recording I/O failed: {0}")]
    RecordingIo(#[from] StorageError),

    #[error("recording could not be loaded: {0}")]
    ReplayParse(String),

    #[error("sequence counter overflowed; ordering can no longer be guaranteed")]
    SequenceOverflow,

    #[error("no handler registered for '{0}'")]
    UnknownType(String),

    #[error("no handler registered for lifecycle event '{}'", .0.as_str())]
    UnknownLifecycle(LifecycleKind),

    #[error("resolver output '{name}' has type '{found}', handler expects '{expected}'")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("resolver output '{0}' was not captured for this item")]
    MissingResolverOutput(String),

    #[error("payload for '{type_identifier}' could not be decoded: {source}")]
    Decode {
        type_identifier: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler rejected item: {0}")]
    Handler(String),

    #[error("frame for tick {found} recorded after tick {last}; frames must be contiguous")]
    RecordingGap { last: u64, found: u64 },

    #[error("recording metadata {0}")]
    MetadataState(&'static str),

    #[error("state hash mismatch at tick {tick_id}: recorded {recorded}, replayed {actual}")]
    HashMismatch {
        tick_id: u64,
        recorded: String,
        actual: String,
    },

    #[error("initial state hash mismatch: recorded {recorded}, rebuilt {actual}")]
    InitialStateMismatch { recorded: String, actual: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("land is no longer running")]
    LandClosed,
}

impl LandError {
    /// Errors after which the land stops processing
    pub fn is_fatal(&self) -> bool {
        matches!(self, LandError::SequenceOverflow)
    }
}
