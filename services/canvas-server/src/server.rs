//! Pipeline assembly and lifecycle

use std::sync::Arc;

use axum::Router;
use persistence::CanvasStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::hub::BroadcastHub;
use crate::ingest::Ingestor;
use crate::metrics::PipelineMetrics;
use crate::queue::UpdateQueue;
use crate::rate_limit::RateLimiter;
use crate::router::create_router;
use crate::shutdown::Shutdown;
use crate::state::AppState;

/// A running pipeline: hub and sweeper tasks plus the state handlers use.
pub struct CanvasServer {
    state: AppState,
    shutdown: Shutdown,
    hub_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl CanvasServer {
    /// Build every component and spawn the background tasks. Must be
    /// called inside a Tokio runtime.
    pub fn start(config: &ServerConfig, store: Arc<dyn CanvasStore>) -> Self {
        let shutdown = Shutdown::new();
        let metrics = Arc::new(PipelineMetrics::new());
        let queue = Arc::new(UpdateQueue::new(config.queue.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        let (hub, hub_handle) = BroadcastHub::new(queue.clone(), config.hub.clone(), metrics.clone());
        let hub_task = hub.spawn(shutdown.listener());
        let sweeper_task = rate_limiter.clone().spawn_sweeper(shutdown.listener());

        let ingestor = Arc::new(Ingestor::new(
            config.bounds,
            rate_limiter.clone(),
            queue.clone(),
            store.clone(),
            metrics.clone(),
            shutdown.clone(),
        ));

        info!(
            queue_capacity = queue.capacity(),
            width = config.bounds.width,
            height = config.bounds.height,
            "Canvas pipeline started"
        );

        Self {
            state: AppState {
                ingestor,
                hub: hub_handle,
                store,
                queue,
                rate_limiter,
                metrics,
                connection: config.connection.clone(),
            },
            shutdown,
            hub_task,
            sweeper_task,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stop ingestion, let the hub deliver what is queued and close every
    /// mailbox, then stop the sweeper.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        if let Err(e) = self.hub_task.await {
            warn!(error = %e, "Broadcast hub task failed");
        }
        if let Err(e) = self.sweeper_task.await {
            warn!(error = %e, "Sweeper task failed");
        }
        info!("Canvas pipeline stopped");
    }
}
