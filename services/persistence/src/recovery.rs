//! Recovery Flow: Boot from snapshot + journal replay
//!
//! Recovery process:
//! 1. Load the latest snapshot, if any (none means an empty canvas)
//! 2. Read the journal's valid prefix
//! 3. Replay entries newer than the snapshot, last write wins
//! 4. Report where the valid prefix ends so the writer can cut a torn tail

use crate::canvas::CanvasState;
use crate::journal::JournalError;
use crate::reader::{CorruptionRecord, JournalReader, ReaderError};
use crate::snapshot::{SnapshotError, SnapshotLoader};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Undecodable journal entry seq={sequence}: {source}")]
    Payload {
        sequence: u64,
        #[source]
        source: JournalError,
    },
}

// ── Recovery Metrics ────────────────────────────────────────────────

/// Metrics collected during the recovery process.
#[derive(Debug, Clone, Default)]
pub struct RecoveryMetrics {
    /// Sequence number of the loaded snapshot (0 if none).
    pub snapshot_sequence: u64,
    /// Pixels restored from the snapshot.
    pub snapshot_pixels: usize,
    /// Journal entries applied on top of the snapshot.
    pub replay_count: u64,
    /// Journal entries already covered by the snapshot.
    pub skipped_count: u64,
    pub total_recovery_time_ms: u64,
    pub final_state_hash: String,
}

/// Result of a successful recovery.
#[derive(Debug)]
pub struct RecoveredCanvas {
    pub state: CanvasState,
    /// Highest sequence seen in the snapshot or the journal (0 if neither).
    pub last_sequence: u64,
    /// Byte length of the journal's valid prefix.
    pub valid_journal_len: u64,
    pub metrics: RecoveryMetrics,
    pub corruption: Vec<CorruptionRecord>,
}

/// Rebuild the canvas stored in `dir`.
pub fn recover(dir: &Path) -> Result<RecoveredCanvas, RecoveryError> {
    let start = Instant::now();
    let mut metrics = RecoveryMetrics::default();

    let (mut state, snapshot_seq) = match SnapshotLoader::new(dir).load_latest() {
        Ok(snapshot) => {
            metrics.snapshot_sequence = snapshot.sequence;
            metrics.snapshot_pixels = snapshot.state.len();
            info!(
                sequence = snapshot.sequence,
                pixels = snapshot.state.len(),
                "Loaded canvas snapshot"
            );
            (snapshot.state, snapshot.sequence)
        }
        Err(SnapshotError::NoSnapshots) => (CanvasState::empty(), 0),
        Err(e) => return Err(e.into()),
    };

    let mut reader = JournalReader::open(dir)?;
    let mut last_sequence = snapshot_seq;

    while let Some(entry) = reader.next_entry()? {
        last_sequence = last_sequence.max(entry.sequence);
        // Compaction crashed between writing the snapshot and resetting the journal.
        if entry.sequence <= snapshot_seq {
            metrics.skipped_count += 1;
            continue;
        }
        let update = entry.decode_update().map_err(|source| RecoveryError::Payload {
            sequence: entry.sequence,
            source,
        })?;
        state.apply(update);
        metrics.replay_count += 1;
    }

    let corruption = reader.corruption_log().to_vec();
    for record in &corruption {
        warn!(
            offset = record.byte_offset,
            kind = ?record.kind,
            detail = %record.detail,
            "Journal corruption; discarding tail"
        );
    }

    metrics.total_recovery_time_ms = start.elapsed().as_millis() as u64;
    metrics.final_state_hash = state.compute_hash();

    info!(
        pixels = state.len(),
        replayed = metrics.replay_count,
        last_sequence,
        elapsed_ms = metrics.total_recovery_time_ms,
        "Canvas recovery complete"
    );

    Ok(RecoveredCanvas {
        state,
        last_sequence,
        valid_journal_len: reader.valid_len(),
        metrics,
        corruption,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalConfig, JournalWriter};
    use crate::snapshot::{Snapshot, SnapshotWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;
    use types::canvas::CanvasBounds;
    use types::pixel::{PixelRequest, PixelUpdate};

    fn pixel(x: i64, color: &str, ts: i64) -> PixelUpdate {
        PixelRequest::new(x, 0, color, "frank")
            .validate(&CanvasBounds::default())
            .unwrap()
            .stamp(ts)
    }

    #[test]
    fn test_empty_dir_recovers_empty_canvas() {
        let tmp = TempDir::new().unwrap();
        let recovered = recover(tmp.path()).unwrap();
        assert!(recovered.state.is_empty());
        assert_eq!(recovered.last_sequence, 0);
        assert_eq!(recovered.valid_journal_len, 0);
    }

    #[test]
    fn test_journal_only_replay_last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        writer.append_update(&pixel(1, "#000000", 10)).unwrap();
        writer.append_update(&pixel(2, "#111111", 11)).unwrap();
        writer.append_update(&pixel(1, "#FFFFFF", 12)).unwrap();
        writer.sync().unwrap();

        let recovered = recover(tmp.path()).unwrap();
        assert_eq!(recovered.state.len(), 2);
        assert_eq!(recovered.state.get(1, 0).unwrap().color.as_str(), "#FFFFFF");
        assert_eq!(recovered.last_sequence, 3);
        assert_eq!(recovered.metrics.replay_count, 3);
    }

    #[test]
    fn test_snapshot_plus_journal_skips_covered_entries() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        let mut state = CanvasState::empty();
        for i in 0..3 {
            let update = pixel(i, "#AAAAAA", 100 + i);
            writer.append_update(&update).unwrap();
            state.apply(update);
        }
        SnapshotWriter::new(tmp.path(), true)
            .write(&Snapshot::new(3, 0, state, true))
            .unwrap();
        writer.append_update(&pixel(0, "#BBBBBB", 200)).unwrap();
        writer.sync().unwrap();

        let recovered = recover(tmp.path()).unwrap();
        assert_eq!(recovered.metrics.snapshot_sequence, 3);
        assert_eq!(recovered.metrics.skipped_count, 3);
        assert_eq!(recovered.metrics.replay_count, 1);
        assert_eq!(recovered.last_sequence, 4);
        assert_eq!(recovered.state.get(0, 0).unwrap().color.as_str(), "#BBBBBB");
    }

    #[test]
    fn test_torn_tail_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        writer.append_update(&pixel(5, "#123456", 1)).unwrap();
        writer.sync().unwrap();
        let good_len = writer.file_size();
        drop(writer);

        let mut file = OpenOptions::new()
            .append(true)
            .open(JournalWriter::journal_path(tmp.path()))
            .unwrap();
        file.write_all(&[0x40, 0, 0, 0, 1, 2, 3]).unwrap();

        let recovered = recover(tmp.path()).unwrap();
        assert_eq!(recovered.state.len(), 1);
        assert_eq!(recovered.valid_journal_len, good_len);
        assert_eq!(recovered.corruption.len(), 1);
    }
}
