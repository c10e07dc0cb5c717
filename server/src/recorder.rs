//! Live-mode recording of executed ticks
//!
//! The recorder buffers one frame per tick and hands a batch to a writer on
//! tokio's blocking pool every `flush_interval` frames, so a slow disk never
//! stalls the tick loop. A batch that fails to persist stays with the writer and is
//! retried together with the next batch.

use log::{debug, error, info, warn};
use shared::{RecordingFrame, RecordingMetadata};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{LandError, StorageError};
use crate::storage::RecordingStorage;

/// Work sent from the land to the writer task
enum WriterCommand {
    Metadata(RecordingMetadata),
    Append(Vec<RecordingFrame>),
    Finish(oneshot::Sender<FlushReport>),
}

/// Totals reported by the writer when the recording is closed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Successful storage appends
    pub flushes: u64,
    pub frames_written: u64,
    /// Frames that could not be persisted even by the final flush
    pub frames_pending: u64,
}

struct Writer {
    storage: Box<dyn RecordingStorage>,
    metadata: Option<RecordingMetadata>,
    metadata_written: bool,
    retained: Vec<RecordingFrame>,
    report: FlushReport,
}

impl Writer {
    /// Persists everything retained so far. Metadata always goes first.
    fn write_retained(&mut self) {
        if !self.metadata_written {
            let Some(metadata) = self.metadata.as_ref() else {
                return;
            };
            if let Err(e) = self.storage.write_metadata(metadata) {
                error!("Failed to write recording metadata: {}", e);
                return;
            }
            self.metadata_written = true;
        }

        if self.retained.is_empty() {
            return;
        }

        match self.storage.append_frames(&self.retained) {
            Ok(()) => {
                self.report.flushes += 1;
                self.report.frames_written += self.retained.len() as u64;
                debug!(
                    "Flushed {} frames (ticks {}..={})",
                    self.retained.len(),
                    self.retained[0].tick_id,
                    self.retained[self.retained.len() - 1].tick_id
                );
                self.retained.clear();
            }
            Err(e) => {
                warn!(
                    "Flush of {} frames failed, retrying on next flush: {}",
                    self.retained.len(),
                    e
                );
            }
        }
    }
}

/// Buffers frames and schedules their persistence
pub struct ActionRecorder {
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    writer: Option<JoinHandle<()>>,
    flush_interval: u64,
    buffer: Vec<RecordingFrame>,
    metadata_set: bool,
    last_tick: Option<u64>,
    frames_recorded: u64,
}

impl ActionRecorder {
    /// Starts the blocking writer. Must be called from within a tokio runtime.
    pub fn spawn(storage: Box<dyn RecordingStorage>, flush_interval: u64) -> Self {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer = Writer {
            storage,
            metadata: None,
            metadata_written: false,
            retained: Vec::new(),
            report: FlushReport::default(),
        };
        let handle = tokio::task::spawn_blocking(move || Self::run_writer(writer, writer_rx));

        Self {
            writer_tx,
            writer: Some(handle),
            flush_interval: flush_interval.max(1),
            buffer: Vec::new(),
            metadata_set: false,
            last_tick: None,
            frames_recorded: 0,
        }
    }

    fn run_writer(mut writer: Writer, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
        while let Some(command) = rx.blocking_recv() {
            match command {
                WriterCommand::Metadata(metadata) => {
                    writer.metadata = Some(metadata);
                    writer.write_retained();
                }
                WriterCommand::Append(frames) => {
                    writer.retained.extend(frames);
                    writer.write_retained();
                }
                WriterCommand::Finish(reply) => {
                    writer.write_retained();
                    writer.report.frames_pending = writer.retained.len() as u64;
                    if reply.send(writer.report).is_err() {
                        debug!("Recorder dropped before final flush report");
                    }
                    return;
                }
            }
        }
    }

    fn send(&self, command: WriterCommand) -> Result<(), LandError> {
        self.writer_tx.send(command).map_err(|_| {
            LandError::RecordingIo(StorageError::Rejected(
                "recording writer has stopped".to_string(),
            ))
        })
    }

    /// Captures land identity. Allowed exactly once, before any frame.
    pub fn set_metadata(&mut self, metadata: RecordingMetadata) -> Result<(), LandError> {
        if self.metadata_set {
            return Err(LandError::MetadataState("has already been set"));
        }
        info!(
            "Recording land {} ({})",
            metadata.land_id, metadata.land_type
        );
        self.send(WriterCommand::Metadata(metadata))?;
        self.metadata_set = true;
        Ok(())
    }

    /// Buffers a tick's frame and flushes when the interval is reached
    pub fn record(&mut self, frame: RecordingFrame) -> Result<(), LandError> {
        if !self.metadata_set {
            return Err(LandError::MetadataState("must be set before recording frames"));
        }
        if let Some(last) = self.last_tick {
            if frame.tick_id != last + 1 {
                return Err(LandError::RecordingGap {
                    last,
                    found: frame.tick_id,
                });
            }
        }

        self.last_tick = Some(frame.tick_id);
        self.frames_recorded += 1;
        self.buffer.push(frame);

        if self.buffer.len() as u64 >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    /// Hands the buffered frames to the writer without waiting for the write
    pub fn flush(&mut self) -> Result<(), LandError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        self.send(WriterCommand::Append(batch))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded
    }

    pub fn flush_interval(&self) -> u64 {
        self.flush_interval
    }

    /// Flushes the partial buffer and waits for the writer to finish
    pub async fn shutdown(mut self) -> Result<FlushReport, LandError> {
        self.flush()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(WriterCommand::Finish(reply_tx))?;

        let report = reply_rx.await.map_err(|_| {
            LandError::RecordingIo(StorageError::Rejected(
                "recording writer exited before the final flush".to_string(),
            ))
        })?;
        if let Some(handle) = self.writer.take() {
            if let Err(e) = handle.await {
                error!("Recording writer task failed: {}", e);
            }
        }

        if report.frames_pending > 0 {
            error!(
                "Recording closed with {} unpersisted frames",
                report.frames_pending
            );
        } else {
            info!(
                "Recording closed: {} frames in {} flushes",
                report.frames_written, report.flushes
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::time::{Duration, Instant};

    /// Storage whose appends hold the calling thread for a while
    struct SlowStorage {
        inner: MemoryStorage,
        delay: Duration,
    }

    impl RecordingStorage for SlowStorage {
        fn write_metadata(&mut self, metadata: &RecordingMetadata) -> Result<(), StorageError> {
            self.inner.write_metadata(metadata)
        }

        fn append_frames(&mut self, frames: &[RecordingFrame]) -> Result<(), StorageError> {
            std::thread::sleep(self.delay);
            self.inner.append_frames(frames)
        }

        fn read_frame(&self, tick_id: u64) -> Result<Option<RecordingFrame>, StorageError> {
            self.inner.read_frame(tick_id)
        }
    }

    fn recorder(storage: &MemoryStorage, interval: u64) -> ActionRecorder {
        let mut recorder = ActionRecorder::spawn(Box::new(storage.clone()), interval);
        recorder
            .set_metadata(RecordingMetadata::new("land-1", "arena"))
            .unwrap();
        recorder
    }

    #[tokio::test]
    async fn test_flushes_every_interval_and_at_shutdown() {
        let storage = MemoryStorage::new();
        let mut recorder = recorder(&storage, 4);

        for tick in 0..10 {
            recorder.record(RecordingFrame::empty(tick)).unwrap();
        }
        assert_eq!(recorder.buffered(), 2);

        let report = recorder.shutdown().await.unwrap();
        assert_eq!(report.flushes, 3);
        assert_eq!(report.frames_written, 10);
        assert_eq!(report.frames_pending, 0);
        assert_eq!(
            storage.batches(),
            vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]
        );
    }

    #[tokio::test]
    async fn test_frames_require_metadata() {
        let storage = MemoryStorage::new();
        let mut recorder = ActionRecorder::spawn(Box::new(storage), 60);

        assert!(matches!(
            recorder.record(RecordingFrame::empty(0)),
            Err(LandError::MetadataState(_))
        ));

        recorder
            .set_metadata(RecordingMetadata::new("land-1", "arena"))
            .unwrap();
        assert!(matches!(
            recorder.set_metadata(RecordingMetadata::new("land-1", "arena")),
            Err(LandError::MetadataState(_))
        ));
    }

    #[tokio::test]
    async fn test_gap_is_refused() {
        let storage = MemoryStorage::new();
        let mut recorder = recorder(&storage, 60);

        recorder.record(RecordingFrame::empty(0)).unwrap();
        match recorder.record(RecordingFrame::empty(2)) {
            Err(LandError::RecordingGap { last, found }) => {
                assert_eq!(last, 0);
                assert_eq!(found, 2);
            }
            other => panic!("expected gap error, got {:?}", other),
        }
        assert_eq!(recorder.frames_recorded(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried() {
        let storage = MemoryStorage::new();
        let mut recorder = recorder(&storage, 2);
        storage.fail_next_appends(1);

        for tick in 0..4 {
            recorder.record(RecordingFrame::empty(tick)).unwrap();
        }
        let report = recorder.shutdown().await.unwrap();

        assert_eq!(report.frames_written, 4);
        assert_eq!(storage.batches(), vec![vec![0, 1, 2, 3]]);
        let ticks: Vec<u64> = storage
            .snapshot()
            .unwrap()
            .frames
            .iter()
            .map(|frame| frame.tick_id)
            .collect();
        assert_eq!(ticks, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_storage_does_not_hold_the_runtime() {
        let storage = MemoryStorage::new();
        let slow = SlowStorage {
            inner: storage.clone(),
            delay: Duration::from_millis(300),
        };
        let mut recorder = ActionRecorder::spawn(Box::new(slow), 1);
        recorder
            .set_metadata(RecordingMetadata::new("land-1", "arena"))
            .unwrap();

        for tick in 0..3 {
            recorder.record(RecordingFrame::empty(tick)).unwrap();
        }
        // Give the runtime a chance to run anything it has queued
        let start = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "runtime thread waited {:?} on storage",
            start.elapsed()
        );

        let report = recorder.shutdown().await.unwrap();
        assert_eq!(report.frames_written, 3);
        assert_eq!(storage.batches(), vec![vec![0], vec![1], vec![2]]);
    }
}
