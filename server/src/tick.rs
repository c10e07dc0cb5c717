//! Per-tick execution of drained items
//!
//! The processor is mode-agnostic: live lands feed it items drained from the
//! pending queue, replaying lands feed it items rebuilt from a recording.
//! Items must arrive sorted by `(resolved_at_tick, sequence)`.

use log::{debug, warn};
use shared::{
    ActorIdentity, EventTargetRecord, RecordKind, RecordedServerEvent, RecordingFrame,
    ResolverOutputs,
};

use crate::error::LandError;
use crate::pending::{PendingItem, RecordedItem};
use crate::registry::{HandlerRegistry, LandState, OutboundEvent, TickContext};
use crate::sequence::SequenceAllocator;

/// Transport callback, invoked once per outbound server event
pub type EventSink = Box<dyn FnMut(u64, &OutboundEvent) + Send>;

/// Everything a single tick executed and emitted
#[derive(Debug)]
pub struct TickOutcome {
    pub tick_id: u64,
    pub executed: Vec<PendingItem>,
    pub server_events: Vec<RecordedServerEvent>,
    pub handler_failures: usize,
}

impl TickOutcome {
    /// Converts the outcome into the tick's recording frame
    pub fn into_frame(self, state_hash: Option<String>) -> RecordingFrame {
        let mut frame = RecordingFrame::empty(self.tick_id);
        for item in self.executed {
            match item.into_record(self.tick_id) {
                RecordedItem::Action(record) => frame.actions.push(record),
                RecordedItem::ClientEvent(record) => frame.client_events.push(record),
                RecordedItem::Lifecycle(record) => frame.lifecycle_events.push(record),
            }
        }
        frame.server_events = self.server_events;
        frame.state_hash = state_hash;
        frame
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub ticks_processed: u64,
    pub items_executed: u64,
    pub handler_failures: u64,
    pub server_events_emitted: u64,
}

#[derive(Debug, Default)]
pub struct TickProcessor {
    stats: TickStats,
}

impl TickProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Applies `items` in order, then runs the state's tick update
    ///
    /// A failing handler does not stop the tick; the failure is logged and
    /// the item still counts as consumed. Only sequence exhaustion aborts.
    pub fn execute<S: LandState>(
        &mut self,
        tick_id: u64,
        state: &mut S,
        registry: &HandlerRegistry<S>,
        items: Vec<PendingItem>,
        sequence: &mut SequenceAllocator,
        sink: &mut Option<EventSink>,
    ) -> Result<TickOutcome, LandError> {
        debug_assert!(
            items.windows(2).all(|w| w[0].order_key() < w[1].order_key()),
            "items must be sorted by (resolved_at_tick, sequence)"
        );

        let mut server_events = Vec::new();
        let mut handler_failures = 0;

        for item in &items {
            let mut emitted = Vec::new();
            let mut ctx =
                TickContext::new(tick_id, &item.actor, &item.resolver_outputs, &mut emitted);
            if let Err(e) = registry.dispatch(state, &mut ctx, item) {
                warn!(
                    "Tick {}: {} '{}' (seq {}) failed: {}",
                    tick_id,
                    item.kind.label(),
                    item.type_identifier,
                    item.sequence,
                    e
                );
                handler_failures += 1;
            }
            self.publish(tick_id, emitted, sequence, sink, &mut server_events)?;
        }

        let nobody = ActorIdentity::default();
        let no_outputs = ResolverOutputs::new();
        let mut emitted = Vec::new();
        let mut ctx = TickContext::new(tick_id, &nobody, &no_outputs, &mut emitted);
        if let Err(e) = state.on_tick(&mut ctx) {
            warn!("Tick {}: tick update failed: {}", tick_id, e);
            handler_failures += 1;
        }
        self.publish(tick_id, emitted, sequence, sink, &mut server_events)?;

        self.stats.ticks_processed += 1;
        self.stats.items_executed += items.len() as u64;
        self.stats.handler_failures += handler_failures as u64;

        if tick_id % 60 == 0 {
            debug!(
                "Tick {}: {} items, {} server events",
                tick_id,
                items.len(),
                server_events.len()
            );
        }

        Ok(TickOutcome {
            tick_id,
            executed: items,
            server_events,
            handler_failures,
        })
    }

    fn publish(
        &mut self,
        tick_id: u64,
        emitted: Vec<OutboundEvent>,
        sequence: &mut SequenceAllocator,
        sink: &mut Option<EventSink>,
        recorded: &mut Vec<RecordedServerEvent>,
    ) -> Result<(), LandError> {
        for event in emitted {
            let seq = sequence.next()?;
            if let Some(sink) = sink.as_mut() {
                sink(tick_id, &event);
            }
            self.stats.server_events_emitted += 1;
            recorded.push(RecordedServerEvent {
                kind: RecordKind::ServerEvent,
                sequence: seq,
                tick_id,
                type_identifier: event.type_identifier,
                payload: event.payload,
                target: EventTargetRecord::from(&event.target),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::{Inbound, LifecycleEvent};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use shared::{EventTarget, LifecycleKind};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        applied: Vec<u64>,
        ticks: u64,
    }

    impl LandState for Log {
        fn state_hash(&self) -> String {
            format!("{:?}/{}", self.applied, self.ticks)
        }

        fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), LandError> {
            self.ticks += 1;
            if ctx.tick_id() == 2 {
                ctx.emit_raw("Milestone", json!({ "tick": 2 }), EventTarget::All);
            }
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Mark {
        id: u64,
    }

    impl crate::registry::TypeIdentified for Mark {
        const TYPE_IDENTIFIER: &'static str = "Mark";
    }

    fn registry() -> HandlerRegistry<Log> {
        let mut registry: HandlerRegistry<Log> = HandlerRegistry::new("log");
        registry
            .on_action::<Mark, _>(|state, ctx, mark| {
                state.applied.push(mark.id);
                let player = ctx.player_id()?.to_string();
                ctx.emit_raw("Marked", json!({ "id": mark.id }), EventTarget::Player(player));
                Ok(())
            })
            .unwrap();
        registry
            .on_client_event::<Mark, _>(|_, _, _| Err(LandError::Handler("read only".into())))
            .unwrap();
        registry
    }

    fn mark(sequence: u64, resolved_at_tick: u64) -> PendingItem {
        Inbound::Action {
            type_identifier: "Mark".to_string(),
            payload: json!({ "id": sequence }),
            actor: ActorIdentity::player("p1"),
        }
        .into_submission(sequence)
        .resolve(ResolverOutputs::new(), resolved_at_tick)
    }

    #[test]
    fn test_items_apply_in_given_order() {
        let registry = registry();
        let mut state = Log::default();
        let mut processor = TickProcessor::new();
        let mut sequence = SequenceAllocator::starting_at(100);
        let mut sink = None;

        let outcome = processor
            .execute(
                0,
                &mut state,
                &registry,
                vec![mark(3, 0), mark(5, 0)],
                &mut sequence,
                &mut sink,
            )
            .unwrap();

        assert_eq!(state.applied, vec![3, 5]);
        assert_eq!(state.ticks, 1);
        assert_eq!(outcome.server_events.len(), 2);
        assert_eq!(outcome.server_events[0].sequence, 100);
        assert_eq!(outcome.server_events[1].sequence, 101);
        assert_eq!(processor.stats().items_executed, 2);
    }

    #[test]
    fn test_sink_sees_every_event_once() {
        let registry = registry();
        let mut state = Log::default();
        let mut processor = TickProcessor::new();
        let mut sequence = SequenceAllocator::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&delivered);
        let mut sink: Option<EventSink> = Some(Box::new(move |tick, event| {
            seen.lock().unwrap().push((tick, event.type_identifier.clone()));
        }));

        processor
            .execute(
                2,
                &mut state,
                &registry,
                vec![mark(0, 2)],
                &mut sequence,
                &mut sink,
            )
            .unwrap();

        let delivered = delivered.lock().unwrap();
        assert_eq!(
            *delivered,
            vec![(2, "Marked".to_string()), (2, "Milestone".to_string())]
        );
    }

    #[test]
    fn test_failed_handler_does_not_stop_tick() {
        let registry = registry();
        let mut state = Log::default();
        let mut processor = TickProcessor::new();
        let mut sequence = SequenceAllocator::new();
        let mut sink = None;

        let bad = Inbound::ClientEvent {
            type_identifier: "Mark".to_string(),
            payload: json!({ "id": 1 }),
            actor: ActorIdentity::player("p1"),
        }
        .into_submission(1)
        .resolve(ResolverOutputs::new(), 0);

        let outcome = processor
            .execute(
                0,
                &mut state,
                &registry,
                vec![bad, mark(2, 0)],
                &mut sequence,
                &mut sink,
            )
            .unwrap();

        assert_eq!(outcome.handler_failures, 1);
        assert_eq!(outcome.executed.len(), 2);
        assert_eq!(state.applied, vec![2]);
    }

    #[test]
    fn test_outcome_becomes_frame() {
        let registry = registry();
        let mut state = Log::default();
        let mut processor = TickProcessor::new();
        let mut sequence = SequenceAllocator::starting_at(10);
        let mut sink = None;
        let join = Inbound::Lifecycle {
            kind: LifecycleKind::Join,
            actor: ActorIdentity::player("p1"),
            event: LifecycleEvent::default(),
        }
        .into_submission(0)
        .resolve(ResolverOutputs::new(), 4);

        let outcome = processor
            .execute(
                4,
                &mut state,
                &registry,
                vec![join, mark(1, 4)],
                &mut sequence,
                &mut sink,
            )
            .unwrap();
        let frame = outcome.into_frame(Some(state.state_hash()));

        assert_eq!(frame.tick_id, 4);
        assert_eq!(frame.actions.len(), 1);
        assert_eq!(frame.lifecycle_events.len(), 1);
        assert_eq!(frame.lifecycle_events[0].tick_id, 4);
        assert_eq!(frame.server_events.len(), 1);
        assert_eq!(frame.state_hash.as_deref(), Some("[1]/1"));
    }
}
