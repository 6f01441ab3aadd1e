//! Cluster-wide reconciliation pass.
//!
//! Each pass recomputes everything from a fresh record listing: release
//! finished nodes, resume drains that a previous coordinator started, then
//! admit waiting nodes up to the per-partition bound. Per-node failures are
//! logged and skipped so one bad node cannot stall the rest of the fleet.

use std::sync::Arc;
use std::time::Duration;

use rollout_id::NodeName;
use rollout_reconcile::{commit, CommitError, RetryConfig};
use rollout_record::{ErrorReason, Phase, RecordStore, StoreError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::admission::plan_admissions;
use crate::cluster::{ClusterApi, ClusterApiError};
use crate::config::Config;

/// Errors that abort a whole coordinator pass.
///
/// Per-node failures never surface here; only losing the record listing
/// does, since without it there is nothing to reconcile against.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Completed nodes returned to idle.
    pub released: usize,

    /// Drains picked up from records already in the draining phase.
    pub drains_resumed: usize,

    /// Waiting nodes granted a slot this pass.
    pub admitted: usize,

    /// Nodes whose handling failed and was deferred to the next pass.
    pub failed: usize,
}

impl ReconcileStats {
    fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// The cluster-scoped update coordinator.
pub struct CoordinatorReconciler {
    store: Arc<dyn RecordStore>,
    cluster: Arc<dyn ClusterApi>,
    retry: RetryConfig,
    max_concurrent_per_partition: usize,
    drain_timeout: Duration,
}

impl CoordinatorReconciler {
    pub fn new(config: &Config, store: Arc<dyn RecordStore>, cluster: Arc<dyn ClusterApi>) -> Self {
        let retry = RetryConfig {
            conflict_retry_limit: config.conflict_retry_limit,
            ..RetryConfig::default()
        };
        Self {
            store,
            cluster,
            retry,
            max_concurrent_per_partition: config.max_concurrent_per_partition,
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        }
    }

    /// Subscribes to the store's change notifications.
    pub fn watch(&self) -> broadcast::Receiver<NodeName> {
        self.store.watch()
    }

    /// Perform a single pass over all node records.
    pub async fn reconcile_all(&self) -> Result<ReconcileStats, CoordinatorError> {
        let mut stats = ReconcileStats::default();

        for versioned in self.store.list().await? {
            let node = versioned.record.node.clone();
            let outcome = match versioned.record.phase {
                Phase::Completed => self.release(&node).await.map(|released| {
                    if released {
                        stats.released += 1;
                    }
                }),
                // A drain in progress when the previous coordinator died.
                // Cordon and drain are idempotent, so driving it again is
                // safe and the node keeps its slot.
                Phase::Draining => {
                    stats.drains_resumed += 1;
                    self.run_drain(&node).await
                }
                // Errored nodes keep their phase for the operator but must
                // not stay out of the scheduler; the failure (or a crash
                // right after it) may have left the node cordoned.
                Phase::Errored => {
                    if let Err(e) = self.cluster.uncordon(&node).await {
                        warn!(node = %node, error = %e, "Uncordon of errored node failed");
                    }
                    Ok(())
                }
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                warn!(node = %node, error = %e, "Deferred node to next pass");
                stats.failed += 1;
            }
        }

        // Releases and resumed drains above moved records, so admission
        // planning needs a fresh snapshot.
        let snapshot: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|v| v.record)
            .collect();

        for node in plan_admissions(&snapshot, self.max_concurrent_per_partition) {
            match self.admit(&node).await {
                Ok(true) => stats.admitted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(node = %node, error = %e, "Deferred admission to next pass");
                    stats.failed += 1;
                }
            }
        }

        if !stats.is_quiet() {
            info!(
                released = stats.released,
                drains_resumed = stats.drains_resumed,
                admitted = stats.admitted,
                failed = stats.failed,
                "Coordinator pass complete"
            );
        }
        Ok(stats)
    }

    /// Completed: uncordon the node and hand the record back to idle.
    async fn release(&self, node: &NodeName) -> Result<bool, CoordinatorError> {
        if let Err(e) = self.cluster.uncordon(node).await {
            // Keep the record in completed so the next pass retries.
            warn!(node = %node, error = %e, "Uncordon failed, release deferred");
            return Ok(false);
        }

        let written = commit(self.store.as_ref(), node, &self.retry, |record| {
            if record.phase != Phase::Completed {
                return None;
            }
            let mut next = record.with_phase(Phase::Idle);
            next.desired_version = None;
            Some(next)
        })
        .await?;

        if written.is_some() {
            info!(node = %node, "Node released back to idle");
        }
        Ok(written.is_some())
    }

    /// Grant a waiting node its slot and start the drain.
    async fn admit(&self, node: &NodeName) -> Result<bool, CoordinatorError> {
        let written = commit(self.store.as_ref(), node, &self.retry, |record| {
            (record.phase == Phase::WaitingForAdmission).then(|| record.with_phase(Phase::Draining))
        })
        .await?;

        // The record moved since the snapshot; the plan is stale for this
        // node and the next pass will recompute it.
        if written.is_none() {
            debug!(node = %node, "Admission skipped, record no longer waiting");
            return Ok(false);
        }

        info!(node = %node, "Admitted node for update");
        self.run_drain(node).await?;
        Ok(true)
    }

    /// Drive one drain: cordon, evict within the timeout, then hand the
    /// node to its agent by moving the record to updating.
    async fn run_drain(&self, node: &NodeName) -> Result<(), CoordinatorError> {
        if let Err(e) = self.cluster.cordon(node).await {
            // Record stays in draining; retried next pass.
            warn!(node = %node, error = %e, "Cordon failed, drain deferred");
            return Ok(());
        }

        let drained = tokio::time::timeout(
            self.drain_timeout,
            self.cluster.drain(node, self.drain_timeout),
        )
        .await;

        match drained {
            Ok(Ok(())) => {
                let written = commit(self.store.as_ref(), node, &self.retry, |record| {
                    (record.phase == Phase::Draining).then(|| record.with_phase(Phase::Updating))
                })
                .await?;
                if written.is_some() {
                    info!(node = %node, "Drain complete, node handed to agent");
                }
                Ok(())
            }
            Ok(Err(ClusterApiError::DrainTimeout { .. })) | Err(_) => {
                self.fail_drain(node, ErrorReason::drain_timeout()).await
            }
            Ok(Err(ClusterApiError::Unavailable(e))) => {
                warn!(node = %node, error = %e, "Cluster API unavailable, drain deferred");
                Ok(())
            }
            Ok(Err(ClusterApiError::Rejected(message))) => {
                self.fail_drain(node, ErrorReason::drain_failed(message)).await
            }
        }
    }

    /// A drain that will not finish: error the record and give the node
    /// back to the scheduler. Its slot frees up immediately; the node
    /// itself stays errored until an operator intervenes. If the uncordon
    /// is lost here, the next pass repairs it on observing the errored
    /// record.
    async fn fail_drain(&self, node: &NodeName, reason: ErrorReason) -> Result<(), CoordinatorError> {
        error!(node = %node, reason = %reason, "Drain abandoned, marking node errored");
        commit(self.store.as_ref(), node, &self.retry, |record| {
            (record.phase == Phase::Draining).then(|| record.with_error(reason.clone()))
        })
        .await?;

        if let Err(e) = self.cluster.uncordon(node).await {
            warn!(node = %node, error = %e, "Uncordon after failed drain did not succeed");
        }
        Ok(())
    }
}
