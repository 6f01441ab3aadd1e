//! Read-mutate-commit loop over the record store.

use rollout_id::NodeName;
use rollout_record::{NodeRecord, RecordStore, Revision, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backoff::Backoff;

/// Default bound on conflict retries per commit.
pub const DEFAULT_CONFLICT_RETRY_LIMIT: u32 = 5;

/// Default bound on transient-infrastructure retries per commit.
pub const DEFAULT_INFRA_RETRY_LIMIT: u32 = 3;

/// Retry discipline for a single commit.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum conflict retries before the commit is surfaced as transient.
    pub conflict_retry_limit: u32,

    /// Backoff between conflict retries.
    pub conflict_backoff: Backoff,

    /// Maximum retries of store unavailability before giving up the cycle.
    pub infra_retry_limit: u32,

    /// Backoff between infrastructure retries.
    pub infra_backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            conflict_retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
            conflict_backoff: Backoff::conflict(),
            infra_retry_limit: DEFAULT_INFRA_RETRY_LIMIT,
            infra_backoff: Backoff::infra(),
        }
    }
}

impl RetryConfig {
    /// A config with zero delays, for tests.
    pub fn immediate() -> Self {
        Self {
            conflict_retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
            conflict_backoff: Backoff::new(
                std::time::Duration::ZERO,
                std::time::Duration::ZERO,
                0.0,
            ),
            infra_retry_limit: DEFAULT_INFRA_RETRY_LIMIT,
            infra_backoff: Backoff::new(std::time::Duration::ZERO, std::time::Duration::ZERO, 0.0),
        }
    }
}

/// Failure of a whole commit, after retries.
///
/// These are scoped to one reconciliation cycle; the caller logs and moves
/// on, and the next cycle re-evaluates from current state.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The record kept changing under us. Another writer is making
    /// progress; the next cycle will observe the result.
    #[error("gave up on node {node} after {attempts} conflicting write attempts")]
    ConflictRetriesExhausted { node: NodeName, attempts: u32 },

    /// The store stayed unreachable through the retry budget.
    #[error("record store unavailable for node {node}: {source}")]
    Unavailable {
        node: NodeName,
        source: StoreError,
    },

    /// The record disappeared. Node removal is owned externally, so this
    /// ends the cycle rather than being retried.
    #[error("record for node {0} no longer exists")]
    Gone(NodeName),
}

/// Reads the node's record, applies `mutate`, and writes the result with
/// compare-and-swap semantics, retrying per `retry`.
///
/// `mutate` must be an idempotent function of current state. It is re-run
/// against a fresh read before every retry, and may return `None` to decline
/// the write entirely (the record already reflects the desired outcome).
///
/// Returns the new revision, or `None` when no write was needed.
pub async fn commit<S, F>(
    store: &S,
    node: &NodeName,
    retry: &RetryConfig,
    mutate: F,
) -> Result<Option<Revision>, CommitError>
where
    S: RecordStore + ?Sized,
    F: Fn(&NodeRecord) -> Option<NodeRecord>,
{
    let mut conflicts = 0u32;
    let mut infra_failures = 0u32;

    loop {
        let read = match store.get(node).await {
            Ok(read) => read,
            Err(StoreError::NotFound(_)) => return Err(CommitError::Gone(node.clone())),
            Err(e) => {
                infra_failures += 1;
                if infra_failures > retry.infra_retry_limit {
                    return Err(CommitError::Unavailable {
                        node: node.clone(),
                        source: e,
                    });
                }
                warn!(node = %node, error = %e, attempt = infra_failures, "Record read failed, backing off");
                tokio::time::sleep(retry.infra_backoff.delay(infra_failures)).await;
                continue;
            }
        };

        let Some(next) = mutate(&read.record) else {
            debug!(node = %node, phase = %read.record.phase, "Record already converged, no write");
            return Ok(None);
        };

        match store.update(read.revision, next).await {
            Ok(revision) => return Ok(Some(revision)),
            Err(e) if e.is_retryable_conflict() => {
                conflicts += 1;
                if conflicts > retry.conflict_retry_limit {
                    return Err(CommitError::ConflictRetriesExhausted {
                        node: node.clone(),
                        attempts: conflicts,
                    });
                }
                debug!(node = %node, error = %e, attempt = conflicts, "Write conflict, re-reading");
                tokio::time::sleep(retry.conflict_backoff.delay(conflicts)).await;
            }
            Err(StoreError::NotFound(_)) => return Err(CommitError::Gone(node.clone())),
            Err(e) => {
                infra_failures += 1;
                if infra_failures > retry.infra_retry_limit {
                    return Err(CommitError::Unavailable {
                        node: node.clone(),
                        source: e,
                    });
                }
                warn!(node = %node, error = %e, attempt = infra_failures, "Record write failed, backing off");
                tokio::time::sleep(retry.infra_backoff.delay(infra_failures)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rollout_record::{MemoryStore, NodeRecord, Phase};

    use super::*;

    async fn seed(store: &MemoryStore) -> NodeName {
        let node: NodeName = "worker-0".parse().unwrap();
        let record = NodeRecord::new(
            node.clone(),
            "zone-a".parse().unwrap(),
            "1.0.0".parse().unwrap(),
        );
        store.create(record).await.unwrap();
        node
    }

    #[tokio::test]
    async fn test_commit_writes_once() {
        let store = MemoryStore::new();
        let node = seed(&store).await;

        let revision = commit(&store, &node, &RetryConfig::immediate(), |record| {
            Some(record.with_phase(Phase::UpdateAvailable))
        })
        .await
        .unwrap();

        assert_eq!(revision, Some(Revision::new(2)));
        let read = store.get(&node).await.unwrap();
        assert_eq!(read.record.phase, Phase::UpdateAvailable);
    }

    #[tokio::test]
    async fn test_noop_mutation_skips_write() {
        let store = MemoryStore::new();
        let node = seed(&store).await;

        let revision = commit(&store, &node, &RetryConfig::immediate(), |_| None)
            .await
            .unwrap();

        assert_eq!(revision, None);
        // Re-running against an unchanged record produces no additional write.
        let read = store.get(&node).await.unwrap();
        assert_eq!(read.revision, Revision::new(1));
    }

    #[tokio::test]
    async fn test_mutation_recomputed_after_conflict() {
        let store = MemoryStore::new();
        let node = seed(&store).await;

        // First attempt proposes an illegal jump (as if computed from stale
        // state); the resolver re-reads and the recomputed mutation succeeds.
        let calls = AtomicU32::new(0);
        let revision = commit(&store, &node, &RetryConfig::immediate(), |record| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(record.with_phase(Phase::Updating))
            } else {
                Some(record.with_phase(Phase::UpdateAvailable))
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(revision, Some(Revision::new(2)));
    }

    #[tokio::test]
    async fn test_conflict_retries_bounded() {
        let store = MemoryStore::new();
        let node = seed(&store).await;

        let mut retry = RetryConfig::immediate();
        retry.conflict_retry_limit = 2;

        // Every attempt proposes an illegal transition, so every write is
        // rejected as retryable and the budget runs out.
        let err = commit(&store, &node, &retry, |record| {
            Some(record.with_phase(Phase::Rebooting))
        })
        .await
        .unwrap_err();

        // With a limit of 2 retries, the write is attempted three times in
        // total, and that is the count the error reports.
        assert!(matches!(
            err,
            CommitError::ConflictRetriesExhausted { attempts: 3, .. }
        ));
        assert!(err.to_string().contains("3 conflicting write attempts"));
    }

    #[tokio::test]
    async fn test_transient_unavailability_retried() {
        let store = MemoryStore::new();
        let node = seed(&store).await;

        store.inject_unavailable(2);
        let revision = commit(&store, &node, &RetryConfig::immediate(), |record| {
            Some(record.with_phase(Phase::UpdateAvailable))
        })
        .await
        .unwrap();
        assert!(revision.is_some());
    }

    #[tokio::test]
    async fn test_unavailability_surfaced_after_budget() {
        let store = MemoryStore::new();
        let node = seed(&store).await;

        let mut retry = RetryConfig::immediate();
        retry.infra_retry_limit = 2;
        store.inject_unavailable(10);

        let err = commit(&store, &node, &retry, |record| {
            Some(record.with_phase(Phase::UpdateAvailable))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CommitError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_record_is_gone() {
        let store = MemoryStore::new();
        let node: NodeName = "ghost".parse().unwrap();

        let err = commit(&store, &node, &RetryConfig::immediate(), |_| None)
            .await
            .unwrap_err();

        assert!(matches!(err, CommitError::Gone(_)));
    }
}
