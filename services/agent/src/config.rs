//! Configuration for the update agent.

use anyhow::{Context, Result};
use rollout_id::{NodeName, PartitionKey};

/// Update agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this agent runs on.
    pub node_name: NodeName,

    /// Partition (failure domain) label of this node.
    pub partition: PartitionKey,

    /// Base URL of the local update API.
    pub update_api_url: String,

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
        let node_name = std::env::var("ROLLOUT_NODE_NAME")
            .context("ROLLOUT_NODE_NAME must be set")?
            .parse()
            .context("ROLLOUT_NODE_NAME is not a valid node name")?;

        let partition = std::env::var("ROLLOUT_PARTITION")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .context("ROLLOUT_PARTITION is not a valid partition key")?
            .unwrap_or_else(PartitionKey::unpartitioned);

        let update_api_url = std::env::var("ROLLOUT_UPDATE_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:4518".to_string());

        let reconcile_interval_secs = std::env::var("ROLLOUT_RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let conflict_retry_limit = std::env::var("ROLLOUT_CONFLICT_RETRY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(rollout_reconcile::DEFAULT_CONFLICT_RETRY_LIMIT);

        let log_level = std::env::var("ROLLOUT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            node_name,
            partition,
            update_api_url,
            reconcile_interval_secs,
            conflict_retry_limit,
            log_level,
        })
    }
}
