use crate::config::ConnectionConfig;
use crate::hub::HubHandle;
use crate::ingest::Ingestor;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::queue::UpdateQueue;
use crate::rate_limit::RateLimiter;
use persistence::CanvasStore;
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub hub: HubHandle,
    pub store: Arc<dyn CanvasStore>,
    pub queue: Arc<UpdateQueue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<PipelineMetrics>,
    pub connection: ConnectionConfig,
}

impl AppState {
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.queue.len(), self.rate_limiter.tracked())
    }
}
