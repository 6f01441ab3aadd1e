//! Cluster disruption API client.
//!
//! Cordon, uncordon, and drain are owned by the cluster API; the
//! coordinator only sequences them around the agent's update window.
//! Cordon and uncordon are idempotent on the cluster side, which is what
//! makes crash recovery safe: re-cordoning a node already in draining is
//! a no-op.

use std::time::Duration;

use async_trait::async_trait;
use rollout_id::NodeName;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from the cluster disruption API.
#[derive(Debug, Error)]
pub enum ClusterApiError {
    /// The drain did not finish within the allotted time. Terminal for the
    /// node's cycle: workload availability wins over update progress.
    #[error("drain did not complete within {timeout:?}")]
    DrainTimeout { timeout: Duration },

    /// The cluster API refused the operation.
    #[error("cluster API rejected request: {0}")]
    Rejected(String),

    /// The cluster API could not be reached. Transient; retried next cycle.
    #[error("cluster API unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ClusterApiError {
    fn from(e: reqwest::Error) -> Self {
        ClusterApiError::Unavailable(e.to_string())
    }
}

/// Interface to the cluster's node disruption operations.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Marks the node unschedulable.
    async fn cordon(&self, node: &NodeName) -> Result<(), ClusterApiError>;

    /// Restores schedulability.
    async fn uncordon(&self, node: &NodeName) -> Result<(), ClusterApiError>;

    /// Evicts movable workloads, waiting up to `timeout`.
    async fn drain(&self, node: &NodeName, timeout: Duration) -> Result<(), ClusterApiError>;
}

/// HTTP client for the cluster disruption API.
pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct DrainRequest {
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct DrainResponse {
    outcome: DrainOutcome,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DrainOutcome {
    Ok,
    Timeout,
    Error,
}

impl HttpClusterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClusterApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClusterApiError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post_simple(&self, url: String) -> Result<(), ClusterApiError> {
        debug!(url = %url, "Cluster API call");
        let response = self.client.post(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(ClusterApiError::Rejected(format!("{status} - {body}")))
        } else {
            Err(ClusterApiError::Unavailable(format!("{status} - {body}")))
        }
    }
}

#[async_trait]
impl ClusterApi for HttpClusterClient {
    async fn cordon(&self, node: &NodeName) -> Result<(), ClusterApiError> {
        self.post_simple(format!("{}/v1/nodes/{}/cordon", self.base_url, node))
            .await
    }

    async fn uncordon(&self, node: &NodeName) -> Result<(), ClusterApiError> {
        self.post_simple(format!("{}/v1/nodes/{}/uncordon", self.base_url, node))
            .await
    }

    async fn drain(&self, node: &NodeName, timeout: Duration) -> Result<(), ClusterApiError> {
        let url = format!("{}/v1/nodes/{}/drain", self.base_url, node);
        debug!(url = %url, timeout_secs = timeout.as_secs(), "Draining node");

        // The drain call itself may legitimately take the whole timeout.
        let response = self
            .client
            .post(&url)
            .json(&DrainRequest {
                timeout_secs: timeout.as_secs(),
            })
            .timeout(timeout + Duration::from_secs(30))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_client_error() {
                Err(ClusterApiError::Rejected(format!("{status} - {body}")))
            } else {
                Err(ClusterApiError::Unavailable(format!("{status} - {body}")))
            };
        }

        let body: DrainResponse = response.json().await?;
        match body.outcome {
            DrainOutcome::Ok => Ok(()),
            DrainOutcome::Timeout => Err(ClusterApiError::DrainTimeout { timeout }),
            DrainOutcome::Error => Err(ClusterApiError::Rejected(
                body.detail.unwrap_or_else(|| "drain failed".to_string()),
            )),
        }
    }
}

/// In-memory cluster API for tests and standalone mode.
///
/// Tracks the cordon set and per-node call counts so tests can assert on
/// sequencing (cordon before drain, no double drain on recovery).
pub struct MockClusterApi {
    state: std::sync::Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    cordoned: std::collections::HashSet<NodeName>,
    cordon_calls: std::collections::HashMap<NodeName, u32>,
    uncordon_calls: std::collections::HashMap<NodeName, u32>,
    drain_calls: std::collections::HashMap<NodeName, u32>,
    drain_behavior: std::collections::HashMap<NodeName, DrainBehavior>,
}

/// How a mock drain should behave for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainBehavior {
    #[default]
    Succeed,
    /// Never completes; the coordinator's timeout fires.
    Hang,
    Fail,
}

impl MockClusterApi {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(MockState::default()),
        }
    }

    pub fn set_drain_behavior(&self, node: &NodeName, behavior: DrainBehavior) {
        self.state
            .lock()
            .unwrap()
            .drain_behavior
            .insert(node.clone(), behavior);
    }

    pub fn is_cordoned(&self, node: &NodeName) -> bool {
        self.state.lock().unwrap().cordoned.contains(node)
    }

    pub fn cordon_calls(&self, node: &NodeName) -> u32 {
        *self
            .state
            .lock()
            .unwrap()
            .cordon_calls
            .get(node)
            .unwrap_or(&0)
    }

    pub fn uncordon_calls(&self, node: &NodeName) -> u32 {
        *self
            .state
            .lock()
            .unwrap()
            .uncordon_calls
            .get(node)
            .unwrap_or(&0)
    }

    pub fn drain_calls(&self, node: &NodeName) -> u32 {
        *self
            .state
            .lock()
            .unwrap()
            .drain_calls
            .get(node)
            .unwrap_or(&0)
    }
}

impl Default for MockClusterApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn cordon(&self, node: &NodeName) -> Result<(), ClusterApiError> {
        let mut state = self.state.lock().unwrap();
        *state.cordon_calls.entry(node.clone()).or_default() += 1;
        state.cordoned.insert(node.clone());
        Ok(())
    }

    async fn uncordon(&self, node: &NodeName) -> Result<(), ClusterApiError> {
        let mut state = self.state.lock().unwrap();
        *state.uncordon_calls.entry(node.clone()).or_default() += 1;
        state.cordoned.remove(node);
        Ok(())
    }

    async fn drain(&self, node: &NodeName, timeout: Duration) -> Result<(), ClusterApiError> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            *state.drain_calls.entry(node.clone()).or_default() += 1;
            state
                .drain_behavior
                .get(node)
                .copied()
                .unwrap_or_default()
        };
        match behavior {
            DrainBehavior::Succeed => Ok(()),
            DrainBehavior::Hang => {
                // Outlive any reasonable test timeout; the caller's
                // tokio::time::timeout cancels this future.
                tokio::time::sleep(timeout + Duration::from_secs(3600)).await;
                Err(ClusterApiError::DrainTimeout { timeout })
            }
            DrainBehavior::Fail => Err(ClusterApiError::Rejected("eviction refused".to_string())),
        }
    }
}
