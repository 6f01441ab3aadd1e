//! rollout update agent entrypoint.
//!
//! One agent runs per node. It drives the node's own state record through
//! the update lifecycle and calls the node-local update API; all cluster
//! coordination happens through the shared record store.

use std::sync::Arc;

use anyhow::Result;
use rollout_agent::config::Config;
use rollout_agent::health::AlwaysHealthy;
use rollout_agent::reconciler::AgentReconciler;
use rollout_agent::updater::HttpUpdateClient;
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

    info!("Starting rollout update agent");
    info!(
        node = %config.node_name,
        partition = %config.partition,
        update_api_url = %config.update_api_url,
        "Configuration loaded"
    );

    // Record store (in-memory for standalone mode; a cluster-backed store
    // plugs in behind the same trait in deployment)
    let store = Arc::new(MemoryStore::new());

    let update_api = Arc::new(HttpUpdateClient::new(config.update_api_url.clone())?);
    let health = Arc::new(AlwaysHealthy);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = AgentReconciler::new(&config, store, update_api, health);
    let reconciler_handle = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = reconciler_handle => {
            info!("Agent reconciler exited");
        }
    }

    let _ = shutdown_tx.send(true);
    info!("Agent shutdown complete");
    Ok(())
}
