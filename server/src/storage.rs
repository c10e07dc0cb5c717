//! Persistence backends for recordings
//!
//! The recorder only talks to [`RecordingStorage`]. Two backends ship with
//! the server: an append-only JSON-lines file and an in-memory store used by
//! tests and by tools that post-process a session without touching disk.

use log::{debug, warn};
use shared::{RecordingFile, RecordingFrame, RecordingMetadata};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StorageError;

pub trait RecordingStorage: Send + 'static {
    /// Writes the metadata record. Called once, before any frame.
    fn write_metadata(&mut self, metadata: &RecordingMetadata) -> Result<(), StorageError>;

    /// Appends a contiguous batch of frames. Either the whole batch is
    /// persisted or the call fails.
    fn append_frames(&mut self, frames: &[RecordingFrame]) -> Result<(), StorageError>;

    fn read_frame(&self, tick_id: u64) -> Result<Option<RecordingFrame>, StorageError>;
}

/// Metadata on the first line, then one frame per line
pub struct JsonLinesStorage {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last complete write
    committed_len: u64,
}

impl JsonLinesStorage {
    /// Creates (or truncates) the recording file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            committed_len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates a recording written by this backend
    pub fn load(path: impl AsRef<Path>) -> Result<RecordingFile, StorageError> {
        let text = std::fs::read_to_string(path)?;
        Ok(RecordingFile::parse(&text)?)
    }

    /// Appends `lines` after the last complete write. A failed write is
    /// cut back off so that a retry never lands behind a partial line.
    fn write_lines(&mut self, lines: &str) -> Result<(), StorageError> {
        if self.file.metadata()?.len() != self.committed_len {
            warn!(
                "Discarding incomplete data at the end of {}",
                self.path.display()
            );
            self.file.set_len(self.committed_len)?;
        }
        self.file.seek(SeekFrom::Start(self.committed_len))?;

        let written = self
            .file
            .write_all(lines.as_bytes())
            .and_then(|()| self.file.flush());
        if let Err(e) = written {
            if let Err(truncate_err) = self.file.set_len(self.committed_len) {
                warn!(
                    "Could not roll back partial write to {}: {}",
                    self.path.display(),
                    truncate_err
                );
            }
            return Err(e.into());
        }

        self.committed_len += lines.len() as u64;
        Ok(())
    }
}

impl RecordingStorage for JsonLinesStorage {
    fn write_metadata(&mut self, metadata: &RecordingMetadata) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(metadata)?;
        line.push('\n');
        self.write_lines(&line)
    }

    fn append_frames(&mut self, frames: &[RecordingFrame]) -> Result<(), StorageError> {
        // Encode the whole batch first so a serialization error writes nothing.
        let mut batch = String::new();
        for frame in frames {
            batch.push_str(&serde_json::to_string(frame)?);
            batch.push('\n');
        }
        self.write_lines(&batch)?;
        debug!(
            "Appended {} frames to {}",
            frames.len(),
            self.path.display()
        );
        Ok(())
    }

    fn read_frame(&self, tick_id: u64) -> Result<Option<RecordingFrame>, StorageError> {
        let recording = Self::load(&self.path)?;
        Ok(recording
            .frames
            .into_iter()
            .find(|frame| frame.tick_id == tick_id))
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    metadata: Option<RecordingMetadata>,
    frames: Vec<RecordingFrame>,
    batches: Vec<Vec<u64>>,
    failures_remaining: usize,
}

/// Shared in-memory backend; clones observe the same recording
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Rejected("memory storage lock poisoned".to_string()))
    }

    /// Makes the next `count` frame appends fail with an I/O error
    pub fn fail_next_appends(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_remaining = count;
        }
    }

    /// The recording as persisted so far, or `None` before metadata
    pub fn snapshot(&self) -> Option<RecordingFile> {
        let inner = self.inner.lock().ok()?;
        let metadata = inner.metadata.clone()?;
        Some(RecordingFile {
            metadata,
            frames: inner.frames.clone(),
        })
    }

    /// Number of successful frame appends
    pub fn flush_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.batches.len()).unwrap_or(0)
    }

    /// Tick ids written by each successful append, in order
    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.inner
            .lock()
            .map(|inner| inner.batches.clone())
            .unwrap_or_default()
    }
}

impl RecordingStorage for MemoryStorage {
    fn write_metadata(&mut self, metadata: &RecordingMetadata) -> Result<(), StorageError> {
        self.lock()?.metadata = Some(metadata.clone());
        Ok(())
    }

    fn append_frames(&mut self, frames: &[RecordingFrame]) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        inner.frames.extend_from_slice(frames);
        inner
            .batches
            .push(frames.iter().map(|frame| frame.tick_id).collect());
        Ok(())
    }

    fn read_frame(&self, tick_id: u64) -> Result<Option<RecordingFrame>, StorageError> {
        Ok(self
            .lock()?
            .frames
            .iter()
            .find(|frame| frame.tick_id == tick_id)
            .cloned())
    }
}
