use std::sync::Arc;

use anyhow::Context;
use canvas_server::CanvasServer;
use canvas_server::config::Cli;
use clap::Parser;
use persistence::{CanvasStore, JournalStore, MemoryStore, StoreConfig};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config();
    config.validate()?;

    tracing::info!("Starting canvas server");

    let store: Arc<dyn CanvasStore> = match &config.data_dir {
        Some(dir) => {
            let store = JournalStore::open(StoreConfig::new(dir))
                .with_context(|| format!("failed to open canvas store in {}", dir.display()))?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("No data directory configured; canvas is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    tracing::info!(pixels = store.pixel_count()?, "Canvas loaded");

    let server = CanvasServer::start(&config, store.clone());

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });

    let mut stop = server.shutdown_handle().listener();
    axum::serve(listener, server.router())
        .with_graceful_shutdown(async move { stop.recv().await })
        .await?;

    server.shutdown().await;

    if config.snapshot_on_shutdown {
        tokio::task::spawn_blocking(move || store.flush())
            .await?
            .context("failed to compact canvas store")?;
    }

    tracing::info!("Canvas server stopped");
    Ok(())
}
