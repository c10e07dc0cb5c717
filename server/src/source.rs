//! Replay input: recorded frames served back tick by tick

use log::info;
use shared::{
    RecordedLifecycleEvent, RecordedServerEvent, RecordingFile, RecordingFrame, RecordingMetadata,
};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LandError;
use crate::pending::PendingItem;

/// Read-only view over a loaded recording, indexed by tick
pub struct ActionSource {
    metadata: RecordingMetadata,
    frames: BTreeMap<u64, RecordingFrame>,
}

impl ActionSource {
    /// Loads and validates a recording; any defect aborts the load
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LandError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LandError::ReplayParse(format!("{}: {}", path.display(), e)))?;
        let recording =
            RecordingFile::parse(&text).map_err(|e| LandError::ReplayParse(e.to_string()))?;
        info!(
            "Loaded recording of land {} with {} frames",
            recording.metadata.land_id,
            recording.frames.len()
        );
        Self::from_file(recording)
    }

    pub fn from_file(recording: RecordingFile) -> Result<Self, LandError> {
        recording
            .validate()
            .map_err(|e| LandError::ReplayParse(e.to_string()))?;
        let frames = recording
            .frames
            .into_iter()
            .map(|frame| (frame.tick_id, frame))
            .collect();
        Ok(Self {
            metadata: recording.metadata,
            frames,
        })
    }

    pub fn metadata(&self) -> &RecordingMetadata {
        &self.metadata
    }

    pub fn frame(&self, tick_id: u64) -> Option<&RecordingFrame> {
        self.frames.get(&tick_id)
    }

    /// Inbound items of a tick, in the order they originally executed
    pub fn items(&self, tick_id: u64) -> Vec<PendingItem> {
        let Some(frame) = self.frames.get(&tick_id) else {
            return Vec::new();
        };
        let mut items: Vec<PendingItem> = frame
            .actions
            .iter()
            .chain(frame.client_events.iter())
            .map(PendingItem::from_recorded_input)
            .chain(
                frame
                    .lifecycle_events
                    .iter()
                    .map(PendingItem::from_recorded_lifecycle),
            )
            .collect();
        items.sort_by_key(PendingItem::order_key);
        items
    }

    pub fn server_events(&self, tick_id: u64) -> &[RecordedServerEvent] {
        self.frames
            .get(&tick_id)
            .map(|frame| frame.server_events.as_slice())
            .unwrap_or(&[])
    }

    pub fn lifecycle_events(&self, tick_id: u64) -> &[RecordedLifecycleEvent] {
        self.frames
            .get(&tick_id)
            .map(|frame| frame.lifecycle_events.as_slice())
            .unwrap_or(&[])
    }

    pub fn recorded_hash(&self, tick_id: u64) -> Option<&str> {
        self.frames
            .get(&tick_id)
            .and_then(|frame| frame.state_hash.as_deref())
    }

    pub fn first_tick_id(&self) -> Option<u64> {
        self.frames.keys().next().copied()
    }

    pub fn max_tick_id(&self) -> Option<u64> {
        self.frames.keys().next_back().copied()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::ItemKind;
    use serde_json::json;
    use shared::{ActorIdentity, LifecycleKind, RecordKind, RecordedInput, ResolverOutputs};

    fn input(kind: RecordKind, sequence: u64, resolved_at_tick: u64) -> RecordedInput {
        RecordedInput {
            kind,
            sequence,
            type_identifier: "MoveTo".to_string(),
            payload: json!({ "x": 1.0 }),
            actor: ActorIdentity::player("p1"),
            resolver_outputs: ResolverOutputs::new(),
            resolved_at_tick,
        }
    }

    fn recording() -> RecordingFile {
        let mut file = RecordingFile::new(RecordingMetadata::new("land-1", "arena"));
        file.frames.push(RecordingFrame::empty(0));
        let mut frame = RecordingFrame::empty(1);
        frame.actions.push(input(RecordKind::Action, 9, 1));
        frame.actions.push(input(RecordKind::Action, 4, 0));
        frame.client_events.push(input(RecordKind::ClientEvent, 6, 1));
        frame.lifecycle_events.push(RecordedLifecycleEvent {
            kind: LifecycleKind::Join,
            sequence: 2,
            tick_id: 1,
            actor: ActorIdentity::player("p2"),
            device_id: None,
            is_guest: Some(true),
            metadata: BTreeMap::new(),
            resolver_outputs: ResolverOutputs::new(),
            resolved_at_tick: 1,
        });
        frame.state_hash = Some("abc".to_string());
        file.frames.push(frame);
        file
    }

    #[test]
    fn test_items_come_back_in_execution_order() {
        let source = ActionSource::from_file(recording()).unwrap();
        let order: Vec<(u64, ItemKind)> = source
            .items(1)
            .iter()
            .map(|item| (item.sequence, item.kind))
            .collect();

        assert_eq!(
            order,
            vec![
                (4, ItemKind::Action),
                (2, ItemKind::Lifecycle(LifecycleKind::Join)),
                (6, ItemKind::ClientEvent),
                (9, ItemKind::Action),
            ]
        );
        assert_eq!(source.recorded_hash(1), Some("abc"));
        assert_eq!(source.recorded_hash(0), None);
        assert!(source.items(7).is_empty());
        assert_eq!(source.max_tick_id(), Some(1));
    }

    #[test]
    fn test_gap_aborts_load() {
        let mut file = recording();
        file.frames.push(RecordingFrame::empty(5));
        assert!(matches!(
            ActionSource::from_file(file),
            Err(LandError::ReplayParse(_))
        ));
    }

    #[test]
    fn test_missing_leading_frames_abort_load() {
        let mut file = RecordingFile::new(RecordingMetadata::new("land-1", "arena"));
        for tick in 5..8 {
            let mut frame = RecordingFrame::empty(tick);
            frame.state_hash = Some(format!("{:016x}", tick));
            file.frames.push(frame);
        }

        match ActionSource::from_file(file) {
            Err(LandError::ReplayParse(reason)) => {
                assert!(reason.contains("expected tick 0, found tick 5"), "{}", reason)
            }
            other => panic!("expected parse error, got {:?}", other.map(|s| s.frame_count())),
        }
    }

    #[test]
    fn test_missing_file_is_a_parse_error() {
        let result = ActionSource::load("/nonexistent/recording.json");
        assert!(matches!(result, Err(LandError::ReplayParse(_))));
    }
}
