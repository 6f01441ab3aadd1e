//! Configuration for the update coordinator.

use anyhow::{Context, Result};

/// Update coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum nodes concurrently in disruptive phases per partition.
    pub max_concurrent_per_partition: usize,

    /// Upper bound on a single node drain in seconds.
    pub drain_timeout_secs: u64,

    /// Base URL of the cluster disruption API.
    pub cluster_api_url: String,

    /// Interval between reconciliation passes in seconds.
    pub reconcile_interval_secs: u64,

    /// Maximum conflict retries per record write.
    pub conflict_retry_limit: u32,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let max_concurrent_per_partition = std::env::var("ROLLOUT_MAX_CONCURRENT_PER_PARTITION")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .context("ROLLOUT_MAX_CONCURRENT_PER_PARTITION must be an integer")?
            .unwrap_or(1);

        let drain_timeout_secs = std::env::var("ROLLOUT_DRAIN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let cluster_api_url = std::env::var("ROLLOUT_CLUSTER_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let reconcile_interval_secs = std::env::var("ROLLOUT_RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        let conflict_retry_limit = std::env::var("ROLLOUT_CONFLICT_RETRY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(rollout_reconcile::DEFAULT_CONFLICT_RETRY_LIMIT);

        let log_level = std::env::var("ROLLOUT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            max_concurrent_per_partition,
            drain_timeout_secs,
            cluster_api_url,
            reconcile_interval_secs,
            conflict_retry_limit,
            log_level,
        })
    }
}
