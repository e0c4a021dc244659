//! Journal Writer: Append-only pixel journal with checksums
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]   // acceptance time of the pixel, Unix millis
//! [payload_len: u32][payload: bytes]   // bincode PixelUpdate
//! [checksum:  u32]   // CRC32C over sequence+timestamp+payload
//! ```

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::pixel::PixelUpdate;

/// File name of the journal inside the data directory.
pub const JOURNAL_FILE: &str = "canvas-journal.bin";

/// Fixed part of an entry body: sequence + timestamp + payload_len + checksum.
const MIN_BODY_LEN: usize = 8 + 8 + 4 + 4;

/// Anything larger is treated as corruption rather than allocated.
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },
}

// ── Journal Entry ───────────────────────────────────────────────────

/// A single journal entry: one accepted pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Gapless sequence number, starting at 1
    pub sequence: u64,
    /// Acceptance timestamp of the pixel (Unix millis)
    pub timestamp: i64,
    /// Bincode-serialized `PixelUpdate`
    pub payload: Vec<u8>,
    /// CRC32C checksum over (sequence ++ timestamp ++ payload)
    pub checksum: u32,
}

impl JournalEntry {
    /// Create a new entry, computing the CRC32C checksum automatically.
    pub fn new(sequence: u64, timestamp: i64, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, timestamp, &payload);
        Self {
            sequence,
            timestamp,
            payload,
            checksum,
        }
    }

    /// Encode a pixel update as an entry.
    pub fn for_update(sequence: u64, update: &PixelUpdate) -> Result<Self, JournalError> {
        let payload = bincode::serialize(update)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(Self::new(sequence, update.timestamp, payload))
    }

    /// Decode the pixel update carried in the payload.
    pub fn decode_update(&self) -> Result<PixelUpdate, JournalError> {
        bincode::deserialize(&self.payload).map_err(|e| JournalError::Serialization(e.to_string()))
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Validate the stored checksum against recomputed value.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.sequence, self.timestamp, &self.payload)
    }

    /// Serialize entry to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = self.payload.len() as u32;
        let body_len = (MIN_BODY_LEN as u32) + payload_len;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize entry from the binary wire format.
    ///
    /// Returns `(entry, bytes_consumed)`. Truncated or implausible input is
    /// an error, never a panic. The checksum is not verified here.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let body_len = read_u32(data, 0)? as usize;

        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "Implausible body length: {} (likely corruption)",
                body_len
            )));
        }
        if body_len < MIN_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "Body too small: {} bytes, minimum is {}",
                body_len, MIN_BODY_LEN
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Serialization(format!(
                "Incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let body = &data[4..total];
        let sequence = read_u64(body, 0)?;
        let timestamp = read_u64(body, 8)? as i64;
        let payload_len = read_u32(body, 16)? as usize;

        if MIN_BODY_LEN + payload_len != body_len {
            return Err(JournalError::Serialization(format!(
                "payload_len {} does not match body length {}",
                payload_len, body_len
            )));
        }

        let payload = body[20..20 + payload_len].to_vec();
        let checksum = read_u32(body, 20 + payload_len)?;

        Ok((
            Self {
                sequence,
                timestamp,
                payload,
                checksum,
            },
            total,
        ))
    }
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32, JournalError> {
    data.get(pos..pos + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| JournalError::Serialization(format!("Not enough data for u32 at {}", pos)))
}

fn read_u64(data: &[u8], pos: usize) -> Result<u64, JournalError> {
    data.get(pos..pos + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| JournalError::Serialization(format!("Not enough data for u64 at {}", pos)))
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushPolicy {
    /// Flush after every write.
    EveryWrite,
    /// Flush every N writes.
    EveryN(usize),
}

/// Controls when `fsync` (durable write) is called.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    EveryWrite,
    /// Fsync every N writes.
    EveryN(usize),
    /// Fsync only on explicit `sync` (compaction, shutdown).
    OnSync,
}

// ── Journal Writer Configuration ────────────────────────────────────

/// Configuration for the journal writer.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the journal file.
    pub dir: PathBuf,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    /// Flush every write, fsync every 64 writes.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryN(64),
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with checksums and fsync control.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    path: PathBuf,
    file_size: u64,
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
}

impl JournalWriter {
    /// Open (or create) the journal in `config.dir` for appending.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;
        let path = Self::journal_path(&config.dir);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            path,
            file_size,
            next_sequence: 1,
            writes_since_flush: 0,
            writes_since_fsync: 0,
        })
    }

    pub fn journal_path(dir: &Path) -> PathBuf {
        dir.join(JOURNAL_FILE)
    }

    /// Set the next expected sequence number (used after recovery).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the journal file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Append a journal entry. Sequences must be gapless.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        let bytes = entry.to_bytes();
        self.writer.write_all(&bytes)?;

        self.file_size += bytes.len() as u64;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;
        Ok(())
    }

    /// Journal one pixel update under the next sequence number.
    pub fn append_update(&mut self, update: &PixelUpdate) -> Result<JournalEntry, JournalError> {
        let entry = JournalEntry::for_update(self.next_sequence, update)?;
        self.append(&entry)?;
        Ok(entry)
    }

    /// Cut the file back to `len` bytes, dropping a torn or corrupt tail.
    pub fn truncate(&mut self, len: u64) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(len)?;
        self.writer.get_ref().sync_all()?;
        self.file_size = len;
        Ok(())
    }

    /// Empty the journal after its contents were captured in a snapshot.
    /// Sequence numbering continues where it left off.
    pub fn reset(&mut self) -> Result<(), JournalError> {
        self.truncate(0)
    }

    /// Force flush + fsync.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn apply_flush_policy(&mut self) -> Result<(), JournalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnSync => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
