//! Local update API client.
//!
//! The mechanism that actually fetches and applies an OS image lives
//! outside this service; the agent only talks to it over a small local
//! HTTP API:
//!
//! - `check_for_update`: is a newer version available?
//! - `stage_update`: write the new image to the inactive partition
//! - `report_status`: where did staging/apply get to?

use std::time::Duration;

use async_trait::async_trait;
use rollout_id::VersionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from the local update API.
#[derive(Debug, Error)]
pub enum UpdateApiError {
    /// The update API could not be reached or answered with a server
    /// error. Transient; the cycle is retried later.
    #[error("update API unavailable: {0}")]
    Unavailable(String),

    /// The update API rejected the request or reported a failed update.
    /// Terminal for this update cycle; the node moves to errored.
    #[error("update execution failed: {0}")]
    Execution(String),
}

impl UpdateApiError {
    /// Returns true when the failure should mark the node errored rather
    /// than being retried next cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateApiError::Execution(_))
    }
}

impl From<reqwest::Error> for UpdateApiError {
    fn from(e: reqwest::Error) -> Self {
        UpdateApiError::Unavailable(e.to_string())
    }
}

/// Progress of a staged update, as reported by the local update API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Nothing staged.
    None,
    /// The image is still being written.
    Staging,
    /// The image is staged and will activate on the next reboot.
    Staged,
    /// The node is running the staged image.
    Applied,
    /// Staging or activation failed.
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Staging => "staging",
            Self::Staged => "staged",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Interface to the node-local update mechanism.
#[async_trait]
pub trait UpdateApi: Send + Sync {
    /// The OS version the node is currently running.
    async fn current_version(&self) -> Result<VersionId, UpdateApiError>;

    /// Checks the update source; returns the newer version if one exists.
    async fn check_for_update(&self) -> Result<Option<VersionId>, UpdateApiError>;

    /// Stages the given version. Idempotent: re-staging an already staged
    /// version is a no-op.
    async fn stage_update(&self, version: &VersionId) -> Result<(), UpdateApiError>;

    /// Reports staging/apply progress.
    async fn report_status(&self) -> Result<StageStatus, UpdateApiError>;
}

/// HTTP client for the local update API.
pub struct HttpUpdateClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    available_version: Option<VersionId>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    current_version: VersionId,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: StageStatus,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct StageRequest<'a> {
    version: &'a VersionId,
}

impl HttpUpdateClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, UpdateApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UpdateApiError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, UpdateApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(UpdateApiError::Execution(format!("{status} - {body}")))
        } else {
            Err(UpdateApiError::Unavailable(format!("{status} - {body}")))
        }
    }
}

#[async_trait]
impl UpdateApi for HttpUpdateClient {
    async fn current_version(&self) -> Result<VersionId, UpdateApiError> {
        let url = format!("{}/v1/os/version", self.base_url);
        let response = self.client.get(&url).send().await?;
        let body: VersionResponse = self.check_response(response).await?.json().await?;
        Ok(body.current_version)
    }

    async fn check_for_update(&self) -> Result<Option<VersionId>, UpdateApiError> {
        let url = format!("{}/v1/updates/check", self.base_url);
        debug!(url = %url, "Checking for update");
        let response = self.client.post(&url).send().await?;
        let body: CheckResponse = self.check_response(response).await?.json().await?;
        Ok(body.available_version)
    }

    async fn stage_update(&self, version: &VersionId) -> Result<(), UpdateApiError> {
        let url = format!("{}/v1/updates/stage", self.base_url);
        debug!(url = %url, version = %version, "Staging update");
        let response = self
            .client
            .post(&url)
            .json(&StageRequest { version })
            .send()
            .await?;
        self.check_response(response).await?;
        Ok(())
    }

    async fn report_status(&self) -> Result<StageStatus, UpdateApiError> {
        let url = format!("{}/v1/updates/status", self.base_url);
        let response = self.client.get(&url).send().await?;
        let body: StatusResponse = self.check_response(response).await?.json().await?;
        if body.status == StageStatus::Failed {
            debug!(detail = ?body.detail, "Update API reports failure");
        }
        Ok(body.status)
    }
}

/// In-memory update API for tests and standalone mode.
pub struct MockUpdateApi {
    state: std::sync::Mutex<MockState>,
}

#[derive(Debug, Clone)]
struct MockState {
    current: VersionId,
    available: Option<VersionId>,
    status: StageStatus,
    staged: Option<VersionId>,
    fail_stage: bool,
}

impl MockUpdateApi {
    pub fn new(current: VersionId) -> Self {
        Self {
            state: std::sync::Mutex::new(MockState {
                current,
                available: None,
                status: StageStatus::None,
                staged: None,
                fail_stage: false,
            }),
        }
    }

    /// Publishes a new available version.
    pub fn publish(&self, version: VersionId) {
        self.state.lock().unwrap().available = Some(version);
    }

    /// Forces subsequent stage calls to fail.
    pub fn fail_next_stage(&self) {
        self.state.lock().unwrap().fail_stage = true;
    }

    /// Simulates the reboot completing into the staged image.
    pub fn finish_reboot(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(staged) = state.staged.clone() {
            state.current = staged;
            state.status = StageStatus::Applied;
        }
    }

    /// Marks the staged update as failed (e.g. activation error).
    pub fn fail_update(&self) {
        self.state.lock().unwrap().status = StageStatus::Failed;
    }
}

#[async_trait]
impl UpdateApi for MockUpdateApi {
    async fn current_version(&self) -> Result<VersionId, UpdateApiError> {
        Ok(self.state.lock().unwrap().current.clone())
    }

    async fn check_for_update(&self) -> Result<Option<VersionId>, UpdateApiError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .available
            .clone()
            .filter(|v| *v != state.current))
    }

    async fn stage_update(&self, version: &VersionId) -> Result<(), UpdateApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stage {
            state.status = StageStatus::Failed;
            return Err(UpdateApiError::Execution("stage rejected".to_string()));
        }
        if state.staged.as_ref() != Some(version) {
            state.staged = Some(version.clone());
        }
        state.status = StageStatus::Staged;
        Ok(())
    }

    async fn report_status(&self) -> Result<StageStatus, UpdateApiError> {
        Ok(self.state.lock().unwrap().status)
    }
}
