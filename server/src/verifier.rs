//! Per-tick determinism checks during replay

use log::warn;
use shared::{EventTargetRecord, RecordedServerEvent};

use crate::error::LandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Match,
    Mismatch { recorded: String, actual: String },
    /// The frame carries no hash to compare against
    NotRecorded,
}

/// Totals for a finished or cancelled replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub ticks_replayed: u64,
    pub hash_matches: u64,
    /// Ticks whose replayed hash differed from the recorded one
    pub mismatches: Vec<u64>,
    pub ticks_without_hash: u64,
    pub server_event_mismatches: Vec<u64>,
    pub initial_state_mismatch: bool,
    pub cancelled: bool,
}

impl ReplaySummary {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
            && self.server_event_mismatches.is_empty()
            && !self.initial_state_mismatch
            && !self.cancelled
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HashVerifier {
    strict: bool,
}

impl HashVerifier {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Compares a tick's replayed hash with the recorded one. A mismatch is
    /// an error only in strict mode.
    pub fn check(
        &self,
        tick_id: u64,
        recorded: Option<&str>,
        actual: &str,
    ) -> Result<VerificationOutcome, LandError> {
        let Some(recorded) = recorded else {
            return Ok(VerificationOutcome::NotRecorded);
        };
        if recorded == actual {
            return Ok(VerificationOutcome::Match);
        }

        warn!(
            "Tick {}: state hash mismatch (recorded {}, replayed {})",
            tick_id, recorded, actual
        );
        if self.strict {
            return Err(LandError::HashMismatch {
                tick_id,
                recorded: recorded.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(VerificationOutcome::Mismatch {
            recorded: recorded.to_string(),
            actual: actual.to_string(),
        })
    }

    /// Compares emitted server events with the recorded ones by type,
    /// payload and target. Sequence numbers are not compared.
    pub fn check_server_events(
        &self,
        tick_id: u64,
        recorded: &[RecordedServerEvent],
        emitted: &[RecordedServerEvent],
    ) -> bool {
        let key = |event: &RecordedServerEvent| -> (String, serde_json::Value, EventTargetRecord) {
            (
                event.type_identifier.clone(),
                event.payload.clone(),
                event.target.clone(),
            )
        };
        let matches = recorded.len() == emitted.len()
            && recorded
                .iter()
                .zip(emitted.iter())
                .all(|(a, b)| key(a) == key(b));
        if !matches {
            warn!(
                "Tick {}: server events diverged ({} recorded, {} replayed)",
                tick_id,
                recorded.len(),
                emitted.len()
            );
        }
        matches
    }
}
