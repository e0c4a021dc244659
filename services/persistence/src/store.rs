//! Canvas stores
//!
//! [`CanvasStore`] is what the ingestion path talks to: save one accepted
//! pixel, load the whole canvas. [`MemoryStore`] keeps everything in RAM;
//! [`JournalStore`] journals every save and compacts into snapshots.

use crate::canvas::CanvasState;
use crate::journal::{JournalConfig, JournalError, JournalWriter};
use crate::recovery::{self, RecoveryError};
use crate::snapshot::{Snapshot, SnapshotCleanupPolicy, SnapshotError, SnapshotWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::pixel::PixelUpdate;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Persistence collaborator of the ingestion path.
///
/// Calls are synchronous and may touch the disk; async callers should run
/// them on a blocking thread.
pub trait CanvasStore: Send + Sync {
    /// Record an accepted pixel. Last write wins per coordinate.
    fn save(&self, update: &PixelUpdate) -> Result<(), StoreError>;

    /// Every painted pixel, oldest first.
    fn load_all(&self) -> Result<Vec<PixelUpdate>, StoreError>;

    fn pixel_count(&self) -> Result<usize, StoreError>;

    /// Make everything saved so far durable.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Memory Store ────────────────────────────────────────────────────

/// Non-durable store for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<CanvasState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanvasStore for MemoryStore {
    fn save(&self, update: &PixelUpdate) -> Result<(), StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .apply(update.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<PixelUpdate>, StoreError> {
        Ok(self.state.read().map_err(|_| StoreError::Poisoned)?.pixels())
    }

    fn pixel_count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().map_err(|_| StoreError::Poisoned)?.len())
    }
}

// ── Journal Store ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub journal: JournalConfig,
    /// zstd-compress snapshots.
    pub compress_snapshots: bool,
    /// Snapshots kept after compaction.
    pub keep_snapshots: usize,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            journal: JournalConfig::new(dir),
            compress_snapshots: true,
            keep_snapshots: 2,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.journal.dir
    }
}

struct Inner {
    writer: JournalWriter,
    state: CanvasState,
    /// Sequence covered by the newest snapshot on disk.
    snapshot_sequence: u64,
}

/// Durable store: journal + in-memory canvas + snapshots.
pub struct JournalStore {
    config: StoreConfig,
    inner: Mutex<Inner>,
}

impl JournalStore {
    /// Recover the canvas in the configured directory and compact it.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let recovered = recovery::recover(config.dir())?;

        let mut writer = JournalWriter::open(config.journal.clone())?;
        if writer.file_size() > recovered.valid_journal_len {
            warn!(
                file_size = writer.file_size(),
                valid_len = recovered.valid_journal_len,
                "Truncating journal to its valid prefix"
            );
            writer.truncate(recovered.valid_journal_len)?;
        }
        writer.set_next_sequence(recovered.last_sequence + 1);

        info!(
            dir = %config.dir().display(),
            pixels = recovered.state.len(),
            next_sequence = writer.next_sequence(),
            "Opened journal store"
        );

        let store = Self {
            inner: Mutex::new(Inner {
                writer,
                state: recovered.state,
                snapshot_sequence: recovered.metrics.snapshot_sequence,
            }),
            config,
        };
        store.compact()?;
        Ok(store)
    }

    /// Snapshot the current canvas and empty the journal.
    ///
    /// Does nothing when no entry was journaled since the last snapshot.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let sequence = inner.writer.next_sequence() - 1;
        if sequence == inner.snapshot_sequence && inner.writer.file_size() == 0 {
            return Ok(());
        }

        inner.writer.sync()?;
        let snapshot = Snapshot::new(
            sequence,
            chrono::Utc::now().timestamp_millis(),
            inner.state.clone(),
            self.config.compress_snapshots,
        );
        let path = SnapshotWriter::new(self.config.dir(), self.config.compress_snapshots)
            .write(&snapshot)?;
        inner.writer.reset()?;
        inner.snapshot_sequence = sequence;

        let removed =
            SnapshotCleanupPolicy::new(self.config.keep_snapshots).cleanup(self.config.dir())?;
        debug!(
            sequence,
            pixels = snapshot.state.len(),
            path = %path.display(),
            removed = removed.len(),
            "Compacted canvas journal"
        );
        Ok(())
    }

    /// Current SHA-256 of the canvas.
    pub fn state_hash(&self) -> Result<String, StoreError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .state
            .compute_hash())
    }
}

impl CanvasStore for JournalStore {
    fn save(&self, update: &PixelUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        inner.writer.append_update(update)?;
        inner.state.apply(update.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<PixelUpdate>, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.state.pixels())
    }

    fn pixel_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().map_err(|_| StoreError::Poisoned)?.state.len())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.compact()
    }
}
