//! Land and replay configuration

use serde_json::Value;
use shared::RecordingMetadata;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_FLUSH_INTERVAL_TICKS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("flush interval must be at least 1 tick")]
    ZeroFlushInterval,
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
    #[error("land id must not be empty")]
    EmptyLandId,
}

/// Settings a land is created with. Fixed for the land's lifetime.
#[derive(Debug, Clone)]
pub struct LandConfig {
    pub land_id: String,
    pub land_type: String,
    pub land_definition_id: Option<String>,
    /// Recorded frames are flushed to storage every this many ticks
    pub flush_interval_ticks: u64,
    /// `None` means ticks only advance through explicit steps
    pub tick_interval: Option<Duration>,
    pub metadata: BTreeMap<String, String>,
    pub land_config: Option<Value>,
}

impl LandConfig {
    pub fn new(land_id: impl Into<String>, land_type: impl Into<String>) -> Self {
        Self {
            land_id: land_id.into(),
            land_type: land_type.into(),
            land_definition_id: None,
            flush_interval_ticks: DEFAULT_FLUSH_INTERVAL_TICKS,
            tick_interval: None,
            metadata: BTreeMap::new(),
            land_config: None,
        }
    }

    pub fn with_flush_interval(mut self, ticks: u64) -> Self {
        self.flush_interval_ticks = ticks;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.land_id.is_empty() {
            return Err(ConfigError::EmptyLandId);
        }
        if self.flush_interval_ticks == 0 {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if self.tick_interval == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }

    /// Builds the metadata record written at the head of the recording
    pub fn recording_metadata(&self, initial_state_hash: Option<String>) -> RecordingMetadata {
        let mut metadata = RecordingMetadata::new(&self.land_id, &self.land_type);
        metadata.metadata = self.metadata.clone();
        metadata.land_definition_id = self.land_definition_id.clone();
        metadata.initial_state_hash = initial_state_hash;
        metadata.land_config = self.land_config.clone();
        metadata
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayConfig {
    /// Abort the replay on the first hash mismatch
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LandConfig::new("land-1", "arena");
        assert_eq!(config.flush_interval_ticks, 60);
        assert!(config.tick_interval.is_none());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_flush_interval_is_rejected() {
        let config = LandConfig::new("land-1", "arena").with_flush_interval(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroFlushInterval));
    }

    #[test]
    fn test_zero_tick_interval_is_rejected() {
        let config = LandConfig::new("land-1", "arena").with_tick_interval(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickInterval));

        let config = LandConfig::new("", "arena");
        assert_eq!(config.validate(), Err(ConfigError::EmptyLandId));
    }

    #[test]
    fn test_recording_metadata_carries_identity() {
        let mut config = LandConfig::new("land-1", "arena");
        config.land_definition_id = Some("arena-v2".to_string());
        config
            .metadata
            .insert("region".to_string(), "eu-west".to_string());

        let metadata = config.recording_metadata(Some("00ff".to_string()));
        assert_eq!(metadata.land_id, "land-1");
        assert_eq!(metadata.land_type, "arena");
        assert_eq!(metadata.land_definition_id.as_deref(), Some("arena-v2"));
        assert_eq!(metadata.initial_state_hash.as_deref(), Some("00ff"));
        assert_eq!(
            metadata.metadata.get("region").map(String::as_str),
            Some("eu-west")
        );
    }
}
