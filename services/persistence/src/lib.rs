//! Canvas Persistence Service
//!
//! Durable storage for the shared canvas. Every accepted pixel is appended
//! to a checksummed journal; the current canvas (last write wins per
//! coordinate) is kept in memory and periodically compacted into a
//! compressed snapshot so the journal stays short.
//!
//! # Layout on disk
//! ```text
//! <data_dir>/
//!   canvas-journal.bin           append-only, CRC32C per entry
//!   snapshot-000000001234.snap.zst
//! ```
//!
//! Startup runs [`recovery::recover`]: latest snapshot, then journal entries
//! after the snapshot's sequence. A torn journal tail is cut off, not fatal.

pub mod journal;
pub mod reader;
pub mod canvas;
pub mod snapshot;
pub mod recovery;
pub mod store;

pub use canvas::CanvasState;
pub use store::{CanvasStore, JournalStore, MemoryStore, StoreConfig, StoreError};
