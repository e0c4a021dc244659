//! Snapshot System: Canvas snapshots with integrity and compression
//!
//! Features:
//! - Full canvas state serialization (bincode)
//! - SHA-256 integrity hash over the canvas contents
//! - Optional zstd compression
//! - Snapshot versioning for forward compatibility
//! - Cleanup policy (keep last N snapshots)

use crate::canvas::CanvasState;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The canvas as of a journal sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Last journal sequence folded into `state` (0 if none).
    pub sequence: u64,
    /// Unix millis when the snapshot was taken.
    pub timestamp: i64,
    pub state: CanvasState,
    /// SHA-256 of `state`.
    pub checksum: String,
    /// Whether the data on disk is zstd-compressed.
    pub compressed: bool,
}

impl Snapshot {
    pub fn new(sequence: u64, timestamp: i64, state: CanvasState, compressed: bool) -> Self {
        let checksum = state.compute_hash();
        Self {
            version: SNAPSHOT_VERSION,
            sequence,
            timestamp,
            state,
            checksum,
            compressed,
        }
    }

    pub fn verify_integrity(&self) -> bool {
        self.checksum == self.state.compute_hash()
    }
}

// ── Snapshot Writer ─────────────────────────────────────────────────

/// Writes snapshots to disk with optional zstd compression.
pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    /// Write a snapshot atomically: serialize → compress → tmp file → rename.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data = bincode::serialize(snapshot)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (final_data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&final_data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        Ok(path)
    }
}

// ── Snapshot Loader ─────────────────────────────────────────────────

/// Loads snapshots from disk, verifying integrity.
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let is_compressed = path.extension().map(|e| e == "zst").unwrap_or(false);

        let decompressed = if is_compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: Snapshot = bincode::deserialize(&decompressed)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }

        if !snapshot.verify_integrity() {
            return Err(SnapshotError::IntegrityFailure {
                expected: snapshot.checksum.clone(),
                actual: snapshot.state.compute_hash(),
            });
        }

        Ok(snapshot)
    }

    /// Load the latest snapshot (highest sequence number).
    pub fn load_latest(&self) -> Result<Snapshot, SnapshotError> {
        let path = self.find_latest()?;
        self.load(&path)
    }

    pub fn find_latest(&self) -> Result<PathBuf, SnapshotError> {
        self.list_snapshots()?
            .pop()
            .map(|(_, path)| path)
            .ok_or(SnapshotError::NoSnapshots)
    }

    /// All snapshots as (sequence, path) pairs, ascending by sequence.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("snapshot-") && (name.ends_with(".snap") || name.ends_with(".snap.zst"))
            {
                if let Some(seq) = Self::parse_sequence(&name) {
                    results.push((seq, entry.path()));
                }
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        Ok(results)
    }

    fn parse_sequence(filename: &str) -> Option<u64> {
        filename
            .trim_start_matches("snapshot-")
            .trim_end_matches(".snap.zst")
            .trim_end_matches(".snap")
            .parse::<u64>()
            .ok()
    }
}

// ── Snapshot Cleanup Policy ─────────────────────────────────────────

/// Policy for cleaning up old snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotCleanupPolicy {
    pub max_snapshots: usize,
}

impl SnapshotCleanupPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }

    /// Remove old snapshots, keeping only the most recent `max_snapshots`.
    pub fn cleanup(&self, dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
        let snapshots = SnapshotLoader::new(dir).list_snapshots()?;

        let mut removed = Vec::new();
        if snapshots.len() > self.max_snapshots {
            let to_remove = snapshots.len() - self.max_snapshots;
            for (_, path) in snapshots.iter().take(to_remove) {
                fs::remove_file(path)?;
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::canvas::CanvasBounds;
    use types::pixel::PixelRequest;

    fn sample_state(n: i64) -> CanvasState {
        let mut state = CanvasState::empty();
        for i in 0..n {
            let update = PixelRequest::new(i, i, "#C0FFEE", "erin")
                .validate(&CanvasBounds::default())
                .unwrap()
                .stamp(1_700_000_000_000 + i);
            state.apply(update);
        }
        state
    }

    #[test]
    fn test_write_and_load_compressed() {
        let tmp = TempDir::new().unwrap();
        let snapshot = Snapshot::new(42, 1_700_000_000_000, sample_state(10), true);

        let path = SnapshotWriter::new(tmp.path(), true).write(&snapshot).unwrap();
        assert!(path.to_string_lossy().ends_with("snapshot-000000000042.snap.zst"));

        let loaded = SnapshotLoader::new(tmp.path()).load_latest().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.state.len(), 10);
    }

    #[test]
    fn test_write_uncompressed() {
        let tmp = TempDir::new().unwrap();
        let snapshot = Snapshot::new(7, 0, sample_state(3), false);
        let path = SnapshotWriter::new(tmp.path(), false).write(&snapshot).unwrap();
        assert!(path.to_string_lossy().ends_with(".snap"));
        assert_eq!(SnapshotLoader::new(tmp.path()).load(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_latest_is_highest_sequence() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), true);
        for seq in [5, 100, 20] {
            writer.write(&Snapshot::new(seq, 0, sample_state(seq as i64 % 7), true)).unwrap();
        }
        assert_eq!(SnapshotLoader::new(tmp.path()).load_latest().unwrap().sequence, 100);
    }

    #[test]
    fn test_no_snapshots() {
        let tmp = TempDir::new().unwrap();
        let result = SnapshotLoader::new(tmp.path().join("missing")).load_latest();
        assert!(matches!(result, Err(SnapshotError::NoSnapshots)));
    }

    #[test]
    fn test_tampered_checksum_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut snapshot = Snapshot::new(1, 0, sample_state(2), false);
        snapshot.checksum = "0".repeat(64);
        let path = SnapshotWriter::new(tmp.path(), false).write(&snapshot).unwrap();

        let result = SnapshotLoader::new(tmp.path()).load(&path);
        assert!(matches!(result, Err(SnapshotError::IntegrityFailure { .. })));
    }

    #[test]
    fn test_cleanup_keeps_latest() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), true);
        for seq in 1..=5 {
            writer.write(&Snapshot::new(seq, 0, sample_state(1), true)).unwrap();
        }

        let removed = SnapshotCleanupPolicy::new(2).cleanup(tmp.path()).unwrap();
        assert_eq!(removed.len(), 3);

        let remaining: Vec<u64> = SnapshotLoader::new(tmp.path())
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        assert_eq!(remaining, vec![4, 5]);
    }
}
