//! Driving a land through a recording

use log::{info, warn};
use shared::RecordingMetadata;
use tokio::sync::watch;

use crate::config::ReplayConfig;
use crate::error::LandError;
use crate::land::{Land, TickReport};
use crate::registry::{HandlerRegistry, LandState};
use crate::source::ActionSource;
use crate::verifier::ReplaySummary;

/// A replaying land plus the bookkeeping to run it to the end of its recording
pub struct ReplaySession<S: LandState> {
    land: Land<S>,
    last_tick: Option<u64>,
}

impl<S: LandState> ReplaySession<S> {
    /// Rebuilds the initial state from the recording's metadata and checks
    /// it against the recorded initial hash
    pub fn new<F>(
        source: ActionSource,
        registry: HandlerRegistry<S>,
        config: ReplayConfig,
        factory: F,
    ) -> Result<Self, LandError>
    where
        F: FnOnce(&RecordingMetadata) -> S,
    {
        let state = factory(source.metadata());
        let initial = source.metadata().initial_state_hash.clone();
        let last_tick = source.max_tick_id();

        let mut land = Land::replay(source, state, registry, config)?;

        if let Some(recorded) = initial {
            let actual = land.state().state_hash();
            if recorded != actual {
                warn!(
                    "Initial state hash mismatch (recorded {}, rebuilt {})",
                    recorded, actual
                );
                if config.strict {
                    return Err(LandError::InitialStateMismatch { recorded, actual });
                }
                if let Some(summary) = land.replay_summary_mut() {
                    summary.initial_state_mismatch = true;
                }
            }
        }

        Ok(Self { land, last_tick })
    }

    pub fn state(&self) -> &S {
        self.land.state()
    }

    pub fn land(&self) -> &Land<S> {
        &self.land
    }

    pub fn is_finished(&self) -> bool {
        match self.last_tick {
            Some(last) => self.land.next_tick_id() > last,
            None => true,
        }
    }

    /// Replays the next recorded tick, or returns `None` past the end
    pub fn step(&mut self) -> Result<Option<TickReport>, LandError> {
        if self.is_finished() {
            return Ok(None);
        }
        self.land.step().map(Some)
    }

    /// Replays every remaining tick, stopping early if `cancel` turns true.
    /// Cancellation is only observed between ticks.
    pub async fn run(mut self, cancel: watch::Receiver<bool>) -> Result<ReplaySummary, LandError> {
        while !self.is_finished() {
            if *cancel.borrow() {
                info!(
                    "Replay of land {} cancelled before tick {}",
                    self.land.land_id(),
                    self.land.next_tick_id()
                );
                if let Some(summary) = self.land.replay_summary_mut() {
                    summary.cancelled = true;
                }
                break;
            }
            self.land.step()?;
            tokio::task::yield_now().await;
        }

        let summary = self.land.replay_summary()?.clone();
        info!(
            "Replay of land {}: {} ticks, {} hash matches, {} mismatches, {} without hash{}",
            self.land.land_id(),
            summary.ticks_replayed,
            summary.hash_matches,
            summary.mismatches.len(),
            summary.ticks_without_hash,
            if summary.passed() { "" } else { " (FAILED)" }
        );
        Ok(summary)
    }
}
