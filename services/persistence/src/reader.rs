//! Journal Reader: Sequential reader with corruption detection
//!
//! Reads the journal front to back, validating the CRC32C of every entry
//! and that sequences are gapless. Reading stops at the first entry that is
//! truncated or fails its checksum; everything before it is the valid
//! prefix, and `valid_len()` tells the writer where to cut the file.

use crate::journal::{JournalEntry, JournalWriter};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

// ── Corruption Log Entry ────────────────────────────────────────────

/// Structured corruption log entry for diagnostics.
#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    /// Byte offset in the file where corruption was detected.
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    TruncatedEntry,
}

// ── Journal Reader ──────────────────────────────────────────────────

/// Sequential journal reader with checksum validation.
pub struct JournalReader {
    data: Vec<u8>,
    pos: usize,
    /// Set once an invalid entry was hit; nothing after it is trusted.
    stopped: bool,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open the journal in `dir`. A missing journal reads as empty.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let path = JournalWriter::journal_path(dir);
        let mut data = Vec::new();
        match File::open(&path) {
            Ok(mut file) => {
                file.read_to_end(&mut data)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self::from_bytes(data))
    }

    /// Read from an in-memory copy of a journal.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            stopped: false,
            last_sequence: None,
            corruption_log: Vec::new(),
        }
    }

    /// Read the next valid entry.
    ///
    /// Returns `None` at the end of the valid prefix. A sequence gap inside
    /// otherwise valid data is an error: it means entries were lost, not torn.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        if self.stopped || self.pos >= self.data.len() {
            return Ok(None);
        }

        let offset = self.pos as u64;
        match JournalEntry::from_bytes(&self.data[self.pos..]) {
            Ok((entry, consumed)) => {
                if !entry.verify_checksum() {
                    self.stop(
                        offset,
                        CorruptionKind::ChecksumMismatch,
                        format!(
                            "CRC32C mismatch for seq={}, stored={:#010x}",
                            entry.sequence, entry.checksum
                        ),
                    );
                    return Ok(None);
                }

                if let Some(prev) = self.last_sequence {
                    if entry.sequence != prev + 1 {
                        return Err(ReaderError::SequenceGap {
                            expected: prev + 1,
                            got: entry.sequence,
                        });
                    }
                }

                self.pos += consumed;
                self.last_sequence = Some(entry.sequence);
                Ok(Some(entry))
            }
            Err(e) => {
                let remaining = self.data.len() - self.pos;
                self.stop(
                    offset,
                    CorruptionKind::TruncatedEntry,
                    format!("{} bytes remaining, cannot parse: {}", remaining, e),
                );
                Ok(None)
            }
        }
    }

    /// Read all valid entries.
    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Length in bytes of the valid prefix consumed so far.
    pub fn valid_len(&self) -> u64 {
        self.pos as u64
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    fn stop(&mut self, byte_offset: u64, kind: CorruptionKind, detail: String) {
        self.stopped = true;
        self.corruption_log.push(CorruptionRecord {
            byte_offset,
            kind,
            detail,
        });
    }
}
