//! Server configuration
//!
//! Each pipeline component owns a small config struct with production
//! defaults; [`ServerConfig`] aggregates them and [`Cli`] fills it from
//! flags or environment variables.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use types::canvas::CanvasBounds;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("retention ({retention:?}) must be at least the cooldown ({cooldown:?})")]
    RetentionBelowCooldown {
        retention: Duration,
        cooldown: Duration,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("ping interval ({ping:?}) must be shorter than the idle timeout ({idle:?})")]
    PingNotBeforeIdle { ping: Duration, idle: Duration },
}

/// Per-identity admission control.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between two accepted updates of one identity.
    pub cooldown: Duration,
    pub sweep_interval: Duration,
    /// Idle identities older than this are forgotten by the sweep.
    pub retention: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Batching schedule of the broadcast hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub flush_interval: Duration,
    /// Buffered updates that force a flush before the interval elapses.
    pub flush_threshold: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            flush_threshold: 50,
        }
    }
}

/// Downstream connection limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Batches a connection may have outstanding before the hub evicts it.
    pub mailbox_capacity: usize,
    /// Close the connection when nothing arrives for this long.
    pub idle_timeout: Duration,
    /// Ping cadence while no batch is written.
    pub ping_interval: Duration,
    pub write_timeout: Duration,
}

impl ConnectionConfig {
    /// Ping at 9/10 of the idle timeout so a live peer always answers in time.
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ping_interval: idle_timeout * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let idle_timeout = Duration::from_secs(60);
        Self {
            mailbox_capacity: 256,
            idle_timeout,
            ping_interval: idle_timeout * 9 / 10,
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub bounds: CanvasBounds,
    pub rate_limit: RateLimitConfig,
    pub queue: QueueConfig,
    pub hub: HubConfig,
    pub connection: ConnectionConfig,
    /// Journal + snapshot directory. `None` keeps the canvas in memory only.
    pub data_dir: Option<PathBuf>,
    /// Compact the journal into a snapshot on graceful shutdown.
    pub snapshot_on_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            bounds: CanvasBounds::default(),
            rate_limit: RateLimitConfig::default(),
            queue: QueueConfig::default(),
            hub: HubConfig::default(),
            connection: ConnectionConfig::default(),
            data_dir: None,
            snapshot_on_shutdown: true,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.retention < rl.cooldown {
            return Err(ConfigError::RetentionBelowCooldown {
                retention: rl.retention,
                cooldown: rl.cooldown,
            });
        }
        if rl.sweep_interval.is_zero() {
            return Err(ConfigError::Zero("sweep interval"));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Zero("queue capacity"));
        }
        if self.hub.flush_threshold == 0 {
            return Err(ConfigError::Zero("flush threshold"));
        }
        if self.hub.flush_interval.is_zero() {
            return Err(ConfigError::Zero("flush interval"));
        }
        let conn = &self.connection;
        if conn.mailbox_capacity == 0 {
            return Err(ConfigError::Zero("mailbox capacity"));
        }
        if conn.write_timeout.is_zero() {
            return Err(ConfigError::Zero("write timeout"));
        }
        if conn.ping_interval.is_zero() {
            return Err(ConfigError::Zero("ping interval"));
        }
        if conn.ping_interval >= conn.idle_timeout {
            return Err(ConfigError::PingNotBeforeIdle {
                ping: conn.ping_interval,
                idle: conn.idle_timeout,
            });
        }
        if self.bounds.width == 0 || self.bounds.height == 0 {
            return Err(ConfigError::Zero("canvas dimension"));
        }
        Ok(())
    }
}

/// Command-line interface of the `canvas-server` binary.
#[derive(Debug, Parser)]
#[command(name = "canvas-server", about = "Shared pixel canvas ingestion and broadcast server")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "CANVAS_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Journal and snapshot directory; omit to keep the canvas in memory
    #[arg(long, env = "CANVAS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "CANVAS_WIDTH", default_value_t = 1000)]
    pub width: u32,

    #[arg(long, env = "CANVAS_HEIGHT", default_value_t = 1000)]
    pub height: u32,

    /// Per-user cooldown between pixels, in seconds
    #[arg(long, env = "CANVAS_COOLDOWN_SECS", default_value_t = 5)]
    pub cooldown_secs: u64,

    #[arg(long, env = "CANVAS_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    #[arg(long, env = "CANVAS_RETENTION_SECS", default_value_t = 600)]
    pub retention_secs: u64,

    #[arg(long, env = "CANVAS_QUEUE_CAPACITY", default_value_t = 10_000)]
    pub queue_capacity: usize,

    #[arg(long, env = "CANVAS_FLUSH_INTERVAL_MS", default_value_t = 100)]
    pub flush_interval_ms: u64,

    #[arg(long, env = "CANVAS_FLUSH_THRESHOLD", default_value_t = 50)]
    pub flush_threshold: usize,

    #[arg(long, env = "CANVAS_MAILBOX_CAPACITY", default_value_t = 256)]
    pub mailbox_capacity: usize,

    /// Close downstream connections silent for this long, in seconds
    #[arg(long, env = "CANVAS_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,

    #[arg(long, env = "CANVAS_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Skip journal compaction on shutdown
    #[arg(long, env = "CANVAS_NO_SHUTDOWN_SNAPSHOT")]
    pub no_shutdown_snapshot: bool,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        let mut connection =
            ConnectionConfig::with_idle_timeout(Duration::from_secs(self.idle_timeout_secs));
        connection.mailbox_capacity = self.mailbox_capacity;
        connection.write_timeout = Duration::from_secs(self.write_timeout_secs);

        ServerConfig {
            bind_addr: self.bind,
            bounds: CanvasBounds {
                width: self.width,
                height: self.height,
            },
            rate_limit: RateLimitConfig {
                cooldown: Duration::from_secs(self.cooldown_secs),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
                retention: Duration::from_secs(self.retention_secs),
            },
            queue: QueueConfig {
                capacity: self.queue_capacity,
            },
            hub: HubConfig {
                flush_interval: Duration::from_millis(self.flush_interval_ms),
                flush_threshold: self.flush_threshold,
            },
            connection,
            data_dir: self.data_dir,
            snapshot_on_shutdown: !self.no_shutdown_snapshot,
        }
    }
}
