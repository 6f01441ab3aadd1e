//! rollout update coordinator entrypoint.
//!
//! Exactly one coordinator runs per cluster. It owns admission control and
//! the cordon/drain sequence; everything it knows about individual nodes
//! comes from the shared record store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rollout_coordinator::cluster::HttpClusterClient;
use rollout_coordinator::config::Config;
use rollout_coordinator::reconciler::CoordinatorReconciler;
use rollout_coordinator::worker::CoordinatorWorker;
use rollout_record::MemoryStore;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (RUST_LOG wins over the configured level)
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting rollout update coordinator");
    info!(
        max_concurrent_per_partition = config.max_concurrent_per_partition,
        drain_timeout_secs = config.drain_timeout_secs,
        cluster_api_url = %config.cluster_api_url,
        "Configuration loaded"
    );

    // Record store (in-memory for standalone mode; a cluster-backed store
    // plugs in behind the same trait in deployment)
    let store = Arc::new(MemoryStore::new());

    let cluster = Arc::new(HttpClusterClient::new(config.cluster_api_url.clone())?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = CoordinatorReconciler::new(&config, store, cluster);
    let worker = CoordinatorWorker::new(
        reconciler,
        Duration::from_secs(config.reconcile_interval_secs),
    );
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = worker_handle => {
            info!("Coordinator worker exited");
        }
    }

    let _ = shutdown_tx.send(true);
    info!("Coordinator shutdown complete");
    Ok(())
}
