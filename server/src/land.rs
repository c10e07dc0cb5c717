//! A land instance and the task that owns it
//!
//! [`Land`] holds everything mutable about one session: state, queue,
//! sequence counter and recorder (live) or recording source (replay). It is
//! never shared. [`spawn_land`] moves it onto its own tokio task and hands
//! back a [`LandHandle`] through which any number of callers submit work.

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use shared::{ActorIdentity, LifecycleKind, RecordedServerEvent, ResolverOutputs};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{LandConfig, ReplayConfig};
use crate::error::LandError;
use crate::pending::{AckSender, Inbound, LifecycleEvent, PendingQueue};
use crate::recorder::{ActionRecorder, FlushReport};
use crate::registry::{HandlerRegistry, LandState, TypeIdentified};
use crate::resolver::{ResolverCompletion, ResolverRunner};
use crate::sequence::SequenceAllocator;
use crate::source::ActionSource;
use crate::storage::RecordingStorage;
use crate::tick::{EventSink, TickProcessor, TickStats};
use crate::verifier::{HashVerifier, ReplaySummary, VerificationOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandMode {
    Live,
    Replay,
}

impl LandMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LandMode::Live => "live",
            LandMode::Replay => "replay",
        }
    }
}

enum ModeState {
    Live {
        queue: PendingQueue,
        recorder: ActionRecorder,
        resolvers: ResolverRunner,
    },
    Replay {
        source: ActionSource,
        verifier: HashVerifier,
        summary: ReplaySummary,
    },
}

/// How a submission was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No resolvers; queued for the next tick
    Queued(u64),
    /// Waiting on resolver work; queued once it completes
    Resolving(u64),
}

impl Admission {
    pub fn sequence(&self) -> u64 {
        match self {
            Admission::Queued(sequence) | Admission::Resolving(sequence) => *sequence,
        }
    }
}

/// What one executed tick produced
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick_id: u64,
    pub state_hash: String,
    /// Sequences of the inbound items executed, in execution order
    pub executed: Vec<u64>,
    pub handler_failures: usize,
    pub server_events: Vec<RecordedServerEvent>,
    /// Replay only
    pub verification: Option<VerificationOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandStats {
    pub mode: LandMode,
    pub next_tick_id: u64,
    pub pending: usize,
    pub resolving: usize,
    pub resolver_tasks_spawned: u64,
    pub submissions_rejected: u64,
    pub frames_recorded: u64,
    pub ticks: TickStats,
}

pub struct Land<S: LandState> {
    land_id: String,
    mode: ModeState,
    state: S,
    registry: HandlerRegistry<S>,
    sequence: SequenceAllocator,
    processor: TickProcessor,
    next_tick_id: u64,
    sink: Option<EventSink>,
    tick_interval: Option<Duration>,
    completions: Option<mpsc::UnboundedReceiver<ResolverCompletion>>,
    resolving: usize,
    submissions_rejected: u64,
    failed: bool,
}

impl<S: LandState> Land<S> {
    /// Creates a live land and records its metadata. Requires a tokio runtime.
    pub fn live(
        config: LandConfig,
        state: S,
        registry: HandlerRegistry<S>,
        storage: Box<dyn RecordingStorage>,
        sink: Option<EventSink>,
    ) -> Result<Self, LandError> {
        config.validate()?;

        let mut recorder = ActionRecorder::spawn(storage, config.flush_interval_ticks);
        recorder.set_metadata(config.recording_metadata(Some(state.state_hash())))?;

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let resolvers = ResolverRunner::new(config.land_id.clone(), completions_tx);

        info!(
            "Land {} ({}) started in live mode, flushing every {} ticks",
            config.land_id, config.land_type, config.flush_interval_ticks
        );

        Ok(Self {
            land_id: config.land_id,
            mode: ModeState::Live {
                queue: PendingQueue::new(),
                recorder,
                resolvers,
            },
            state,
            registry,
            sequence: SequenceAllocator::new(),
            processor: TickProcessor::new(),
            next_tick_id: 0,
            sink,
            tick_interval: config.tick_interval,
            completions: Some(completions_rx),
            resolving: 0,
            submissions_rejected: 0,
            failed: false,
        })
    }

    /// Creates a land that executes only what `source` recorded
    pub fn replay(
        source: ActionSource,
        state: S,
        registry: HandlerRegistry<S>,
        config: ReplayConfig,
    ) -> Result<Self, LandError> {
        let metadata = source.metadata();
        if metadata.land_type != registry.land_type() {
            return Err(LandError::ReplayParse(format!(
                "recording is for land type '{}', handlers are for '{}'",
                metadata.land_type,
                registry.land_type()
            )));
        }
        let land_id = metadata.land_id.clone();
        info!(
            "Land {} ({}) started in replay mode{}",
            land_id,
            metadata.land_type,
            if config.strict { ", strict" } else { "" }
        );

        Ok(Self {
            land_id,
            mode: ModeState::Replay {
                source,
                verifier: HashVerifier::new(config.strict),
                summary: ReplaySummary::default(),
            },
            state,
            registry,
            sequence: SequenceAllocator::new(),
            processor: TickProcessor::new(),
            next_tick_id: 0,
            sink: None,
            tick_interval: None,
            completions: None,
            resolving: 0,
            submissions_rejected: 0,
            failed: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_sequence_start(mut self, first: u64) -> Self {
        self.sequence = SequenceAllocator::starting_at(first);
        self
    }

    pub fn land_id(&self) -> &str {
        &self.land_id
    }

    pub fn mode(&self) -> LandMode {
        match self.mode {
            ModeState::Live { .. } => LandMode::Live,
            ModeState::Replay { .. } => LandMode::Replay,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn next_tick_id(&self) -> u64 {
        self.next_tick_id
    }

    /// True once a fatal error has occurred; the land must stop
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn check_fatal<T>(&mut self, result: Result<T, LandError>) -> Result<T, LandError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!("Land {} failed: {}", self.land_id, e);
                self.failed = true;
            }
        }
        result
    }

    /// Admits an item into the live queue, or starts its resolvers
    pub fn submit(&mut self, inbound: Inbound) -> Result<Admission, LandError> {
        let result = self.admit(inbound);
        if result.is_err() {
            self.submissions_rejected += 1;
        }
        self.check_fatal(result)
    }

    fn admit(&mut self, inbound: Inbound) -> Result<Admission, LandError> {
        let operation = inbound.operation();
        let ModeState::Live {
            queue, resolvers, ..
        } = &mut self.mode
        else {
            return Err(LandError::ModeViolation {
                operation,
                mode: LandMode::Replay.as_str(),
            });
        };

        let declared = match self
            .registry
            .resolvers_for(inbound.kind(), inbound.type_identifier())
        {
            Ok(declared) => declared.to_vec(),
            Err(e) => {
                warn!("Land {}: rejected {}: {}", self.land_id, operation, e);
                return Err(e);
            }
        };

        let sequence = self.sequence.next()?;
        let submission = inbound.into_submission(sequence);

        if declared.is_empty() {
            queue.push(submission.resolve(ResolverOutputs::new(), self.next_tick_id));
            Ok(Admission::Queued(sequence))
        } else {
            resolvers.spawn(submission, declared);
            self.resolving += 1;
            Ok(Admission::Resolving(sequence))
        }
    }

    /// Queues a resolved item for the next tick that has not started yet
    pub fn apply_completion(&mut self, completion: ResolverCompletion) -> Result<u64, LandError> {
        self.resolving = self.resolving.saturating_sub(1);
        let ResolverCompletion { submission, result } = completion;
        let sequence = submission.sequence;

        match result {
            Ok(outputs) => {
                if let ModeState::Live { queue, .. } = &mut self.mode {
                    queue.push(submission.resolve(outputs, self.next_tick_id));
                }
                Ok(sequence)
            }
            Err(e) => {
                warn!(
                    "Land {}: {} '{}' (seq {}) dropped: {}",
                    self.land_id,
                    submission.kind.label(),
                    submission.type_identifier,
                    sequence,
                    e
                );
                self.submissions_rejected += 1;
                Err(e)
            }
        }
    }

    /// Waits for every outstanding resolution and applies it.
    /// Only meaningful while the land is driven directly rather than by
    /// [`spawn_land`].
    pub async fn settle(&mut self) -> Vec<Result<u64, LandError>> {
        let mut results = Vec::new();
        while self.resolving > 0 {
            let Some(completions) = self.completions.as_mut() else {
                break;
            };
            match completions.recv().await {
                Some(completion) => results.push(self.apply_completion(completion)),
                None => break,
            }
        }
        results
    }

    /// Executes the next tick
    pub fn step(&mut self) -> Result<TickReport, LandError> {
        let result = self.execute_tick();
        self.check_fatal(result)
    }

    fn execute_tick(&mut self) -> Result<TickReport, LandError> {
        let tick_id = self.next_tick_id;
        let items = match &mut self.mode {
            ModeState::Live { queue, .. } => queue.drain(tick_id + 1),
            ModeState::Replay { source, .. } => source.items(tick_id),
        };

        let outcome = self.processor.execute(
            tick_id,
            &mut self.state,
            &self.registry,
            items,
            &mut self.sequence,
            &mut self.sink,
        )?;
        let state_hash = self.state.state_hash();
        self.next_tick_id += 1;

        let mut report = TickReport {
            tick_id,
            state_hash: state_hash.clone(),
            executed: outcome.executed.iter().map(|item| item.sequence).collect(),
            handler_failures: outcome.handler_failures,
            server_events: outcome.server_events.clone(),
            verification: None,
        };

        match &mut self.mode {
            ModeState::Live { recorder, .. } => {
                recorder.record(outcome.into_frame(Some(state_hash)))?;
            }
            ModeState::Replay {
                source,
                verifier,
                summary,
            } => {
                summary.ticks_replayed += 1;
                if !verifier.check_server_events(
                    tick_id,
                    source.server_events(tick_id),
                    &report.server_events,
                ) {
                    summary.server_event_mismatches.push(tick_id);
                }

                let verification =
                    match verifier.check(tick_id, source.recorded_hash(tick_id), &state_hash) {
                        Ok(verification) => verification,
                        Err(e) => {
                            summary.mismatches.push(tick_id);
                            return Err(e);
                        }
                    };
                match verification {
                    VerificationOutcome::Match => summary.hash_matches += 1,
                    VerificationOutcome::Mismatch { .. } => summary.mismatches.push(tick_id),
                    VerificationOutcome::NotRecorded => summary.ticks_without_hash += 1,
                }
                report.verification = Some(verification);
            }
        }

        Ok(report)
    }

    /// Last recorded tick, for replaying lands
    pub fn replay_end(&self) -> Result<Option<u64>, LandError> {
        match &self.mode {
            ModeState::Replay { source, .. } => Ok(source.max_tick_id()),
            ModeState::Live { .. } => Err(LandError::ModeViolation {
                operation: "replay_end",
                mode: LandMode::Live.as_str(),
            }),
        }
    }

    pub fn replay_summary(&self) -> Result<&ReplaySummary, LandError> {
        match &self.mode {
            ModeState::Replay { summary, .. } => Ok(summary),
            ModeState::Live { .. } => Err(LandError::ModeViolation {
                operation: "replay_summary",
                mode: LandMode::Live.as_str(),
            }),
        }
    }

    pub(crate) fn replay_summary_mut(&mut self) -> Option<&mut ReplaySummary> {
        match &mut self.mode {
            ModeState::Replay { summary, .. } => Some(summary),
            ModeState::Live { .. } => None,
        }
    }

    pub fn stats(&self) -> LandStats {
        let (pending, resolver_tasks_spawned, frames_recorded) = match &self.mode {
            ModeState::Live {
                queue,
                recorder,
                resolvers,
            } => (
                queue.len(),
                resolvers.tasks_spawned(),
                recorder.frames_recorded(),
            ),
            ModeState::Replay { .. } => (0, 0, 0),
        };
        LandStats {
            mode: self.mode(),
            next_tick_id: self.next_tick_id,
            pending,
            resolving: self.resolving,
            resolver_tasks_spawned,
            submissions_rejected: self.submissions_rejected,
            frames_recorded,
            ticks: self.processor.stats(),
        }
    }

    /// Stops the land, flushing whatever the recorder still buffers.
    /// Items still queued or resolving are discarded.
    pub async fn shutdown(self) -> Result<Option<FlushReport>, LandError> {
        let stats = self.stats();
        info!(
            "Land {} stopping after {} ticks ({} items executed)",
            self.land_id, stats.next_tick_id, stats.ticks.items_executed
        );
        match self.mode {
            ModeState::Live {
                queue, recorder, ..
            } => {
                if !queue.is_empty() || self.resolving > 0 {
                    warn!(
                        "Land {}: discarding {} queued and {} resolving items",
                        self.land_id,
                        queue.len(),
                        self.resolving
                    );
                }
                recorder.shutdown().await.map(Some)
            }
            ModeState::Replay { .. } => Ok(None),
        }
    }
}

enum LandMessage {
    Submit {
        inbound: Inbound,
        ack: AckSender,
    },
    Step {
        reply: oneshot::Sender<Result<TickReport, LandError>>,
    },
    Stats {
        reply: oneshot::Sender<LandStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<Option<FlushReport>, LandError>>,
    },
}

/// Cloneable entry point to a land running on its own task
#[derive(Clone)]
pub struct LandHandle {
    tx: mpsc::UnboundedSender<LandMessage>,
}

impl LandHandle {
    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> LandMessage,
    ) -> Result<T, LandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(message(reply_tx))
            .map_err(|_| LandError::LandClosed)?;
        reply_rx.await.map_err(|_| LandError::LandClosed)
    }

    /// Hands a submission to the land without waiting. Submissions enqueued
    /// from one task reach the land in the order they were enqueued.
    pub fn enqueue(
        &self,
        inbound: Inbound,
    ) -> Result<oneshot::Receiver<Result<u64, LandError>>, LandError> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(LandMessage::Submit { inbound, ack })
            .map_err(|_| LandError::LandClosed)?;
        Ok(ack_rx)
    }

    /// Resolves with the item's sequence once it is queued
    pub async fn submit(&self, inbound: Inbound) -> Result<u64, LandError> {
        let ack = self.enqueue(inbound)?;
        ack.await.map_err(|_| LandError::LandClosed)?
    }

    pub async fn submit_action(
        &self,
        type_identifier: impl Into<String>,
        payload: Value,
        actor: ActorIdentity,
    ) -> Result<u64, LandError> {
        self.submit(Inbound::Action {
            type_identifier: type_identifier.into(),
            payload,
            actor,
        })
        .await
    }

    pub async fn submit_typed_action<A>(
        &self,
        action: &A,
        actor: ActorIdentity,
    ) -> Result<u64, LandError>
    where
        A: TypeIdentified + Serialize,
    {
        let payload = serde_json::to_value(action).map_err(|source| LandError::Decode {
            type_identifier: A::TYPE_IDENTIFIER.to_string(),
            source,
        })?;
        self.submit_action(A::TYPE_IDENTIFIER, payload, actor).await
    }

    pub async fn submit_client_event(
        &self,
        type_identifier: impl Into<String>,
        payload: Value,
        actor: ActorIdentity,
    ) -> Result<u64, LandError> {
        self.submit(Inbound::ClientEvent {
            type_identifier: type_identifier.into(),
            payload,
            actor,
        })
        .await
    }

    pub async fn submit_lifecycle_event(
        &self,
        kind: LifecycleKind,
        actor: ActorIdentity,
        event: LifecycleEvent,
    ) -> Result<u64, LandError> {
        self.submit(Inbound::Lifecycle { kind, actor, event })
            .await
    }

    /// Executes one tick immediately
    pub async fn step(&self) -> Result<TickReport, LandError> {
        self.request(|reply| LandMessage::Step { reply }).await?
    }

    pub async fn stats(&self) -> Result<LandStats, LandError> {
        self.request(|reply| LandMessage::Stats { reply }).await
    }

    pub async fn shutdown(&self) -> Result<Option<FlushReport>, LandError> {
        self.request(|reply| LandMessage::Shutdown { reply })
            .await?
    }
}

/// Moves `land` onto its own task. Ticks advance on the land's configured
/// interval, or only through [`LandHandle::step`] when it has none.
pub fn spawn_land<S: LandState>(
    mut land: Land<S>,
) -> (LandHandle, JoinHandle<Result<(), LandError>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let completions = land.completions.take();
    let handle = tokio::spawn(run_land(land, rx, completions));
    (LandHandle { tx }, handle)
}

async fn next_completion(
    completions: &mut Option<mpsc::UnboundedReceiver<ResolverCompletion>>,
) -> Option<ResolverCompletion> {
    match completions {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn reply_ack(ack: AckSender, result: Result<u64, LandError>) {
    if ack.send(result).is_err() {
        debug!("Submitter went away before its acknowledgment");
    }
}

async fn run_land<S: LandState>(
    mut land: Land<S>,
    mut rx: mpsc::UnboundedReceiver<LandMessage>,
    mut completions: Option<mpsc::UnboundedReceiver<ResolverCompletion>>,
) -> Result<(), LandError> {
    let auto_tick = land.tick_interval.is_some();
    let mut ticker = interval(land.tick_interval.unwrap_or(Duration::from_secs(3600)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_resolution: HashMap<u64, AckSender> = HashMap::new();

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(LandMessage::Submit { inbound, ack }) => match land.submit(inbound) {
                        Ok(Admission::Queued(sequence)) => reply_ack(ack, Ok(sequence)),
                        Ok(Admission::Resolving(sequence)) => {
                            awaiting_resolution.insert(sequence, ack);
                        }
                        Err(e) => reply_ack(ack, Err(e)),
                    },
                    Some(LandMessage::Step { reply }) => {
                        if reply.send(land.step()).is_err() {
                            debug!("Step requester went away");
                        }
                    }
                    Some(LandMessage::Stats { reply }) => {
                        if reply.send(land.stats()).is_err() {
                            debug!("Stats requester went away");
                        }
                    }
                    Some(LandMessage::Shutdown { reply }) => {
                        let result = land.shutdown().await;
                        if reply.send(result).is_err() {
                            debug!("Shutdown requester went away");
                        }
                        return Ok(());
                    }
                    None => {
                        info!("All handles to land {} dropped", land.land_id());
                        land.shutdown().await?;
                        return Ok(());
                    }
                }
            },

            Some(completion) = next_completion(&mut completions) => {
                let sequence = completion.submission.sequence;
                let result = land.apply_completion(completion);
                if let Some(ack) = awaiting_resolution.remove(&sequence) {
                    reply_ack(ack, result);
                }
            },

            _ = ticker.tick(), if auto_tick => {
                if let Err(e) = land.step() {
                    if !e.is_fatal() {
                        warn!("Land {}: tick failed: {}", land.land_id(), e);
                    }
                }
            },
        }

        if land.is_failed() {
            land.shutdown().await?;
            return Err(LandError::SequenceOverflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{capture, Resolver, ResolverContext, ResolverError};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use shared::{EventTarget, RecordedResolverOutput};
    use std::sync::Arc;

    #[derive(Default)]
    struct Ledger {
        entries: Vec<(u64, String)>,
    }

    impl LandState for Ledger {
        fn state_hash(&self) -> String {
            crate::hash::state_hash(&self.entries).unwrap_or_default()
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl TypeIdentified for Note {
        const TYPE_IDENTIFIER: &'static str = "Note";
    }

    #[derive(Serialize, Deserialize)]
    struct Stamp(String);

    impl TypeIdentified for Stamp {
        const TYPE_IDENTIFIER: &'static str = "Stamp";
    }

    struct Stamper {
        fail: bool,
    }

    #[async_trait]
    impl Resolver for Stamper {
        fn name(&self) -> &str {
            "stamp"
        }

        async fn resolve(
            &self,
            ctx: &ResolverContext,
        ) -> Result<RecordedResolverOutput, ResolverError> {
            if self.fail {
                return Err(ResolverError::Failed("stamp service down".to_string()));
            }
            capture(&Stamp(format!("approved:{}", ctx.type_identifier)))
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Approved {
        text: String,
    }

    impl TypeIdentified for Approved {
        const TYPE_IDENTIFIER: &'static str = "Approved";
    }

    #[derive(Serialize, Deserialize)]
    struct Denied;

    impl TypeIdentified for Denied {
        const TYPE_IDENTIFIER: &'static str = "Denied";
    }

    fn registry() -> HandlerRegistry<Ledger> {
        let mut registry: HandlerRegistry<Ledger> = HandlerRegistry::new("ledger");
        registry
            .on_action::<Note, _>(|state, ctx, note| {
                state.entries.push((ctx.tick_id(), note.text));
                Ok(())
            })
            .unwrap();
        registry
            .on_action_with_resolvers::<Approved, _>(
                vec![Arc::new(Stamper { fail: false })],
                |state, ctx, approved| {
                    let stamp: Stamp = ctx.resolved("stamp")?;
                    state
                        .entries
                        .push((ctx.tick_id(), format!("{} {}", approved.text, stamp.0)));
                    ctx.emit_raw("Stamped", json!({ "text": approved.text }), EventTarget::All);
                    Ok(())
                },
            )
            .unwrap();
        registry
            .on_action_with_resolvers::<Denied, _>(
                vec![Arc::new(Stamper { fail: true })],
                |_, _, _| Ok(()),
            )
            .unwrap();
        registry
    }

    fn note(text: &str) -> Inbound {
        Inbound::Action {
            type_identifier: "Note".to_string(),
            payload: json!({ "text": text }),
            actor: ActorIdentity::player("p1"),
        }
    }

    fn live(storage: &MemoryStorage) -> Land<Ledger> {
        Land::live(
            LandConfig::new("land-1", "ledger"),
            Ledger::default(),
            registry(),
            Box::new(storage.clone()),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fast_path_runs_next_tick_without_spawning() {
        let storage = MemoryStorage::new();
        let mut land = live(&storage);

        assert_eq!(land.submit(note("a")).unwrap(), Admission::Queued(0));
        assert_eq!(land.submit(note("b")).unwrap(), Admission::Queued(1));

        let report = land.step().unwrap();
        assert_eq!(report.tick_id, 0);
        assert_eq!(report.executed, vec![0, 1]);
        assert_eq!(land.stats().resolver_tasks_spawned, 0);
        assert_eq!(
            land.state().entries,
            vec![(0, "a".to_string()), (0, "b".to_string())]
        );
    }

    #[tokio::test]
    async fn test_resolver_item_waits_for_completion() {
        let storage = MemoryStorage::new();
        let mut land = live(&storage);
        let approved = Inbound::Action {
            type_identifier: "Approved".to_string(),
            payload: json!({ "text": "x" }),
            actor: ActorIdentity::player("p1"),
        };

        assert_eq!(land.submit(approved).unwrap(), Admission::Resolving(0));
        land.step().unwrap();
        assert!(land.state().entries.is_empty());

        let results = land.settle().await;
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 0);

        let report = land.step().unwrap();
        assert_eq!(report.executed, vec![0]);
        assert_eq!(report.server_events.len(), 1);
        assert_eq!(
            land.state().entries,
            vec![(1, "x approved:Approved".to_string())]
        );
        assert_eq!(land.stats().resolver_tasks_spawned, 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_rejects_item() {
        let storage = MemoryStorage::new();
        let mut land = live(&storage);
        let denied = Inbound::Action {
            type_identifier: "Denied".to_string(),
            payload: Value::Null,
            actor: ActorIdentity::player("p1"),
        };

        land.submit(denied).unwrap();
        let results = land.settle().await;
        assert!(matches!(results[0], Err(LandError::ResolverFailure { .. })));

        // The failed item's sequence is never handed out again.
        assert_eq!(land.submit(note("after")).unwrap(), Admission::Queued(1));
        assert_eq!(land.step().unwrap().executed, vec![1]);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let storage = MemoryStorage::new();
        let mut land = live(&storage);
        let result = land.submit(Inbound::Action {
            type_identifier: "Teleport".to_string(),
            payload: Value::Null,
            actor: ActorIdentity::player("p1"),
        });

        assert!(matches!(result, Err(LandError::UnknownType(_))));
        assert_eq!(land.stats().submissions_rejected, 1);
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let storage = MemoryStorage::new();
        let (handle, task) = spawn_land(live(&storage));

        let sequence = handle
            .submit_typed_action(
                &Approved {
                    text: "hi".to_string(),
                },
                ActorIdentity::player("p1"),
            )
            .await
            .unwrap();
        assert_eq!(sequence, 0);

        let report = handle.step().await.unwrap();
        assert_eq!(report.executed, vec![0]);

        let flush = handle.shutdown().await.unwrap().unwrap();
        assert_eq!(flush.frames_written, 1);
        task.await.unwrap().unwrap();

        assert!(matches!(handle.step().await, Err(LandError::LandClosed)));
        let recording = storage.snapshot().unwrap();
        let outputs = &recording.frames[0].actions[0].resolver_outputs;
        assert_eq!(outputs["stamp"].type_identifier, "Stamp");
    }

    #[tokio::test]
    async fn test_concurrent_handles_get_distinct_ordered_sequences() {
        let storage = MemoryStorage::new();
        let (handle, task) = spawn_land(live(&storage));

        let mut submitters = Vec::new();
        for worker in 0..8 {
            let handle = handle.clone();
            submitters.push(tokio::spawn(async move {
                let mut acked = Vec::new();
                for i in 0..10 {
                    let text = format!("w{}-{}", worker, i);
                    let sequence = handle.submit(note(&text)).await.unwrap();
                    acked.push((sequence, text));
                }
                acked
            }));
        }
        let mut acked = Vec::new();
        for submitter in submitters {
            acked.extend(submitter.await.unwrap());
        }
        acked.sort();

        let sequences: Vec<u64> = acked.iter().map(|(sequence, _)| *sequence).collect();
        assert_eq!(sequences, (0..80).collect::<Vec<u64>>());

        let report = handle.step().await.unwrap();
        assert_eq!(report.executed, sequences);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let recording = storage.snapshot().unwrap();
        let recorded: Vec<(u64, String)> = recording.frames[0]
            .actions
            .iter()
            .map(|action| {
                let text = action.payload["text"].as_str().unwrap_or_default();
                (action.sequence, text.to_string())
            })
            .collect();
        assert_eq!(recorded, acked);
    }

    #[tokio::test]
    async fn test_tick_interval_drives_ticks() {
        let storage = MemoryStorage::new();
        let land = Land::live(
            LandConfig::new("land-1", "ledger").with_tick_interval(Duration::from_millis(5)),
            Ledger::default(),
            registry(),
            Box::new(storage.clone()),
            None,
        )
        .unwrap();
        let (handle, task) = spawn_land(land);

        handle.submit(note("auto")).await.unwrap();
        let mut stats = handle.stats().await.unwrap();
        for _ in 0..200 {
            if stats.next_tick_id >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            stats = handle.stats().await.unwrap();
        }
        assert!(stats.next_tick_id >= 3, "only {} ticks ran", stats.next_tick_id);

        let flush = handle.shutdown().await.unwrap().unwrap();
        task.await.unwrap().unwrap();
        assert!(flush.frames_written >= 3);

        let recording = storage.snapshot().unwrap();
        let executed: Vec<u64> = recording
            .frames
            .iter()
            .flat_map(|frame| frame.actions.iter().map(|action| action.sequence))
            .collect();
        assert_eq!(executed, vec![0]);
    }

    #[tokio::test]
    async fn test_sequence_overflow_stops_the_land() {
        let storage = MemoryStorage::new();
        let land = live(&storage).with_sequence_start(u64::MAX - 1);
        let (handle, task) = spawn_land(land);

        assert_eq!(handle.submit(note("last")).await.unwrap(), u64::MAX - 1);
        assert!(matches!(
            handle.submit(note("one too many")).await,
            Err(LandError::SequenceOverflow)
        ));

        assert!(matches!(
            task.await.unwrap(),
            Err(LandError::SequenceOverflow)
        ));
        assert!(matches!(
            handle.submit(note("closed")).await,
            Err(LandError::LandClosed)
        ));
        assert!(storage.snapshot().unwrap().validate().is_ok());
    }
}
