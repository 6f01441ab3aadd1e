//! Per-node reconciliation loop.
//!
//! On each wake (periodic tick or watch notification for its own node) the
//! agent reads its record, evaluates the transition condition for the phase
//! it owns, and attempts the corresponding write through the conflict
//! resolver. Every mutation re-checks the phase against fresh state, so a
//! competing writer that already advanced the record turns the attempt into
//! a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rollout_id::{NodeName, PartitionKey, VersionId};
use rollout_reconcile::{commit, CommitError, RetryConfig};
use rollout_record::{ErrorReason, NodeRecord, Phase, RecordStore, StoreError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::health::HealthCheck;
use crate::updater::{StageStatus, UpdateApi, UpdateApiError};

/// Errors from a single agent reconciliation pass.
///
/// All of these are cycle-scoped: the loop logs them and re-evaluates from
/// current state on the next wake.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    UpdateApi(#[from] UpdateApiError),
}

/// The per-node update agent.
pub struct AgentReconciler {
    store: Arc<dyn RecordStore>,
    update_api: Arc<dyn UpdateApi>,
    health: Arc<dyn HealthCheck>,
    node: NodeName,
    partition: PartitionKey,
    retry: RetryConfig,
    reconcile_interval: Duration,
}

impl AgentReconciler {
    pub fn new(
        config: &Config,
        store: Arc<dyn RecordStore>,
        update_api: Arc<dyn UpdateApi>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let retry = RetryConfig {
            conflict_retry_limit: config.conflict_retry_limit,
            ..RetryConfig::default()
        };
        Self {
            store,
            update_api,
            health,
            node: config.node_name.clone(),
            partition: config.partition.clone(),
            retry,
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
        }
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.node,
            partition = %self.partition,
            interval_secs = self.reconcile_interval.as_secs(),
            "Starting agent reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.reconcile_interval);
        let mut notifications = self.store.watch();
        let mut watch_open = true;

        loop {
            let mut wake = false;
            tokio::select! {
                _ = interval.tick() => {
                    wake = true;
                }
                changed = notifications.recv(), if watch_open => {
                    match changed {
                        // Only this node's record is the agent's business.
                        Ok(node) if node == self.node => wake = true,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "Watch lagged, reconciling from current state");
                            wake = true;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Watch channel closed, falling back to polling");
                            watch_open = false;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Agent reconciler shutting down");
                        break;
                    }
                }
            }

            if wake {
                if let Err(e) = self.reconcile_once().await {
                    warn!(node = %self.node, error = %e, "Agent reconciliation pass failed");
                }
            }
        }
    }

    /// Perform a single reconciliation pass against the node's record.
    pub async fn reconcile_once(&self) -> Result<(), AgentError> {
        let versioned = match self.store.get(&self.node).await {
            Ok(versioned) => versioned,
            Err(StoreError::NotFound(_)) => return self.register().await,
            Err(e) => return Err(e.into()),
        };

        let record = versioned.record;
        debug!(node = %self.node, phase = %record.phase, "Agent evaluating record");

        match record.phase {
            Phase::Idle => self.check_for_update().await,
            Phase::UpdateAvailable => self.request_admission().await,
            Phase::Updating => self.stage_update(record.desired_version).await,
            Phase::Rebooting => self.observe_reboot().await,
            Phase::Verifying => self.verify_health().await,
            // Coordinator- or operator-owned phases: nothing for the agent.
            Phase::WaitingForAdmission | Phase::Draining | Phase::Completed | Phase::Errored => {
                Ok(())
            }
        }
    }

    /// Create the initial idle record when the node first registers.
    async fn register(&self) -> Result<(), AgentError> {
        let current = self.update_api.current_version().await?;
        let record = NodeRecord::new(self.node.clone(), self.partition.clone(), current.clone());
        match self.store.create(record).await {
            Ok(revision) => {
                info!(node = %self.node, version = %current, revision = %revision, "Registered node record");
                Ok(())
            }
            // Lost a (re)creation race; the record exists, which is all we need.
            Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Idle: poll the update source and surface a newer version.
    async fn check_for_update(&self) -> Result<(), AgentError> {
        let Some(desired) = self.update_api.check_for_update().await? else {
            return Ok(());
        };

        let written = commit(self.store.as_ref(), &self.node, &self.retry, |record| {
            if record.phase != Phase::Idle || record.current_version == desired {
                return None;
            }
            let mut next = record.with_phase(Phase::UpdateAvailable);
            next.desired_version = Some(desired.clone());
            Some(next)
        })
        .await?;

        if written.is_some() {
            info!(node = %self.node, desired = %desired, "Update available");
        }
        Ok(())
    }

    /// UpdateAvailable: ask for a concurrency slot.
    async fn request_admission(&self) -> Result<(), AgentError> {
        let written = commit(self.store.as_ref(), &self.node, &self.retry, |record| {
            if record.phase != Phase::UpdateAvailable {
                return None;
            }
            let mut next = record.with_phase(Phase::WaitingForAdmission);
            next.waiting_since = Some(Utc::now());
            Some(next)
        })
        .await?;

        if written.is_some() {
            info!(node = %self.node, "Waiting for admission");
        }
        Ok(())
    }

    /// Updating: drive the local update API until the image is staged.
    async fn stage_update(&self, desired: Option<VersionId>) -> Result<(), AgentError> {
        let Some(desired) = desired else {
            // Admitted without a target version; only possible if something
            // outside this system rewrote the record. Do not guess a
            // version, and do not keep holding the slot.
            warn!(node = %self.node, "Updating phase without a desired version");
            return self
                .mark_errored(
                    Phase::Updating,
                    ErrorReason::update_failed("no desired version on record"),
                )
                .await;
        };

        if let Err(e) = self.update_api.stage_update(&desired).await {
            if e.is_terminal() {
                return self
                    .mark_errored(Phase::Updating, ErrorReason::update_failed(e.to_string()))
                    .await;
            }
            return Err(e.into());
        }

        match self.update_api.report_status().await? {
            StageStatus::Staged | StageStatus::Applied => {
                let written = commit(self.store.as_ref(), &self.node, &self.retry, |record| {
                    (record.phase == Phase::Updating)
                        .then(|| record.with_phase(Phase::Rebooting))
                })
                .await?;
                if written.is_some() {
                    info!(node = %self.node, desired = %desired, "Image staged, rebooting");
                }
                Ok(())
            }
            StageStatus::Failed => {
                self.mark_errored(
                    Phase::Updating,
                    ErrorReason::update_failed("update API reported staging failure"),
                )
                .await
            }
            StageStatus::None | StageStatus::Staging => Ok(()),
        }
    }

    /// Rebooting: wait until the node is back on the staged image.
    async fn observe_reboot(&self) -> Result<(), AgentError> {
        match self.update_api.report_status().await? {
            StageStatus::Applied => {
                let written = commit(self.store.as_ref(), &self.node, &self.retry, |record| {
                    (record.phase == Phase::Rebooting)
                        .then(|| record.with_phase(Phase::Verifying))
                })
                .await?;
                if written.is_some() {
                    info!(node = %self.node, "Node rejoined after reboot, verifying");
                }
                Ok(())
            }
            StageStatus::Failed => {
                self.mark_errored(
                    Phase::Rebooting,
                    ErrorReason::update_failed("update API reported apply failure"),
                )
                .await
            }
            _ => Ok(()),
        }
    }

    /// Verifying: run the post-update health policy.
    async fn verify_health(&self) -> Result<(), AgentError> {
        match self.health.verify().await {
            Ok(()) => {
                let running = self.update_api.current_version().await?;
                let written = commit(self.store.as_ref(), &self.node, &self.retry, |record| {
                    if record.phase != Phase::Verifying {
                        return None;
                    }
                    let mut next = record.with_phase(Phase::Completed);
                    next.current_version = running.clone();
                    Some(next)
                })
                .await?;
                if written.is_some() {
                    info!(node = %self.node, version = %running, "Update verified");
                }
                Ok(())
            }
            Err(reason) => {
                self.mark_errored(Phase::Verifying, ErrorReason::health_check_failed(reason))
                    .await
            }
        }
    }

    /// Move the record to errored, provided it is still in `from`.
    async fn mark_errored(&self, from: Phase, reason: ErrorReason) -> Result<(), AgentError> {
        error!(node = %self.node, phase = %from, reason = %reason, "Marking node errored");
        commit(self.store.as_ref(), &self.node, &self.retry, |record| {
            (record.phase == from).then(|| record.with_error(reason.clone()))
        })
        .await?;
        Ok(())
    }
}
