//! Shared pixel canvas server
//!
//! Ingestion and distribution pipeline for a collaborative pixel grid:
//!
//! ```text
//! POST /api/pixel → Ingestor ── RateLimiter (per-user cooldown)
//!                       │
//!                       ├── CanvasStore (journal, last write wins)
//!                       ▼
//!                  UpdateQueue (bounded FIFO)
//!                       ▼
//!                 BroadcastHub ── batch by size or interval
//!                       ▼
//!     Connection mailboxes → WebSocket /ws/queue (JSON arrays)
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod ingest;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod state;

pub use config::ServerConfig;
pub use server::CanvasServer;
