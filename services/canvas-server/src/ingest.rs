//! Ingestion entrypoint
//!
//! validate → admit → stamp → persist → enqueue. Persistence failures are
//! logged and counted but never stop an accepted update from reaching the
//! queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use persistence::CanvasStore;
use thiserror::Error;
use tracing::{debug, warn};
use types::canvas::CanvasBounds;
use types::errors::ValidationError;
use types::pixel::{PixelRequest, PixelUpdate};

use crate::metrics::PipelineMetrics;
use crate::queue::{EnqueueError, UpdateQueue};
use crate::rate_limit::{Admission, RateLimiter};
use crate::shutdown::Shutdown;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rate limit exceeded, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("update queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("server is shutting down")]
    ShuttingDown,
}

/// Server clock for acceptance timestamps: wall-clock millis that never go
/// backwards, even if the system clock does.
#[derive(Debug, Default)]
pub struct AcceptanceClock {
    last: AtomicI64,
}

impl AcceptanceClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let prev = self.last.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

pub struct Ingestor {
    bounds: CanvasBounds,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<UpdateQueue>,
    store: Arc<dyn CanvasStore>,
    metrics: Arc<PipelineMetrics>,
    clock: AcceptanceClock,
    shutdown: Shutdown,
}

impl Ingestor {
    pub fn new(
        bounds: CanvasBounds,
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<UpdateQueue>,
        store: Arc<dyn CanvasStore>,
        metrics: Arc<PipelineMetrics>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            bounds,
            rate_limiter,
            queue,
            store,
            metrics,
            clock: AcceptanceClock::new(),
            shutdown,
        }
    }

    /// Run one request through the pipeline.
    ///
    /// A request rejected by validation never touches the rate limiter; a
    /// rate-limited one is never stamped, persisted or queued.
    pub async fn submit(&self, request: PixelRequest) -> Result<PixelUpdate, IngestError> {
        if self.shutdown.is_triggered() {
            return Err(IngestError::ShuttingDown);
        }

        let pixel = request.validate(&self.bounds).map_err(|e| {
            self.metrics.record_invalid();
            debug!(error = %e, "Rejected invalid pixel");
            e
        })?;

        if let Admission::Limited { retry_after } =
            self.rate_limiter.try_acquire(pixel.user_id().as_str())
        {
            self.metrics.record_rate_limited();
            debug!(user_id = %pixel.user_id(), retry_after_ms = retry_after.as_millis() as u64, "Rate limited");
            return Err(IngestError::RateLimited { retry_after });
        }

        let update = pixel.stamp(self.clock.now());
        self.persist(&update).await;

        match self.queue.enqueue(update.clone()) {
            Ok(()) => {}
            Err(EnqueueError::Full { capacity }) => {
                self.metrics.record_queue_full();
                warn!(user_id = %update.user_id, capacity, "Update queue full");
                return Err(IngestError::QueueFull { capacity });
            }
            Err(EnqueueError::Closed) => {
                // Shutdown began while this update was being persisted.
                debug!(user_id = %update.user_id, "Queue closed; rejecting pixel");
                return Err(IngestError::ShuttingDown);
            }
        }

        self.metrics.record_accepted();
        debug!(
            user_id = %update.user_id,
            x = update.x,
            y = update.y,
            color = %update.color,
            timestamp = update.timestamp,
            "Pixel accepted"
        );
        Ok(update)
    }

    async fn persist(&self, update: &PixelUpdate) {
        let store = self.store.clone();
        let owned = update.clone();
        let result = tokio::task::spawn_blocking(move || store.save(&owned)).await;
        let error = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        self.metrics.record_persistence_failure();
        warn!(x = update.x, y = update.y, error = %error, "Failed to persist pixel");
    }
}
