//! Record store contract and the in-memory implementation.
//!
//! The store is the only mutation path for node state records. Writes are
//! compare-and-swap on the revision read, which is what makes the rest of
//! the design safe without a central lock service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rollout_id::NodeName;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::phase::Phase;
use crate::record::{NodeRecord, Revision, VersionedRecord};

/// Errors from record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the node.
    #[error("record not found for node {0}")]
    NotFound(NodeName),

    /// A record already exists for the node.
    #[error("record already exists for node {0}")]
    AlreadyExists(NodeName),

    /// Another writer updated the record since it was read.
    #[error("conflict on node {node}: read revision {expected}, current is {current}")]
    Conflict {
        node: NodeName,
        expected: Revision,
        current: Revision,
    },

    /// The write attempted a phase transition outside the table. After a
    /// re-read this usually resolves to a no-op, so callers treat it like
    /// a conflict.
    #[error("invalid transition {from} -> {to} for node {node}")]
    InvalidTransition {
        node: NodeName,
        from: Phase,
        to: Phase,
    },

    /// The store itself could not be reached.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true for failures that a re-read plus recompute can resolve.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::InvalidTransition { .. }
        )
    }
}

/// Access to the externally stored, versioned node state records.
///
/// `update` has compare-and-swap semantics: it succeeds only if
/// `expected` is still the current revision, and rejects phase transitions
/// outside the table regardless of revision. Watch notifications are
/// at-least-once and unordered across nodes; consumers must re-read rather
/// than trust event payloads.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, node: &NodeName) -> Result<VersionedRecord, StoreError>;

    async fn list(&self) -> Result<Vec<VersionedRecord>, StoreError>;

    async fn create(&self, record: NodeRecord) -> Result<Revision, StoreError>;

    async fn update(&self, expected: Revision, record: NodeRecord)
        -> Result<Revision, StoreError>;

    /// Subscribes to change notifications (node names, at-least-once).
    fn watch(&self) -> broadcast::Receiver<NodeName>;
}

/// In-memory record store.
///
/// Backs tests, the e2e harness, and the services' standalone mode. The
/// CAS and transition checks mirror what the real cluster store enforces.
pub struct MemoryStore {
    records: Mutex<HashMap<NodeName, (NodeRecord, Revision)>>,
    notify: broadcast::Sender<NodeName>,
    fail_next: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(256);
        Self {
            records: Mutex::new(HashMap::new()),
            notify,
            fail_next: AtomicU32::new(0),
        }
    }

    /// Makes the next `n` writes fail with [`StoreError::Unavailable`].
    /// Test hook for exercising the transient-infra retry path.
    pub fn inject_unavailable(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn notify_changed(&self, node: &NodeName) {
        // No receivers is fine; notifications are an optimization over polling.
        let _ = self.notify.send(node.clone());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, node: &NodeName) -> Result<VersionedRecord, StoreError> {
        let records = self.records.lock().expect("record map poisoned");
        records
            .get(node)
            .map(|(record, revision)| VersionedRecord {
                record: record.clone(),
                revision: *revision,
            })
            .ok_or_else(|| StoreError::NotFound(node.clone()))
    }

    async fn list(&self) -> Result<Vec<VersionedRecord>, StoreError> {
        let records = self.records.lock().expect("record map poisoned");
        let mut all: Vec<_> = records
            .values()
            .map(|(record, revision)| VersionedRecord {
                record: record.clone(),
                revision: *revision,
            })
            .collect();
        all.sort_by(|a, b| a.record.node.cmp(&b.record.node));
        Ok(all)
    }

    async fn create(&self, record: NodeRecord) -> Result<Revision, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let node = record.node.clone();
        {
            let mut records = self.records.lock().expect("record map poisoned");
            if records.contains_key(&node) {
                return Err(StoreError::AlreadyExists(node));
            }
            records.insert(node.clone(), (record, Revision::new(1)));
        }
        debug!(node = %node, "Created node record");
        self.notify_changed(&node);
        Ok(Revision::new(1))
    }

    async fn update(
        &self,
        expected: Revision,
        record: NodeRecord,
    ) -> Result<Revision, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let node = record.node.clone();
        let new_revision = {
            let mut records = self.records.lock().expect("record map poisoned");
            let Some((current, revision)) = records.get(&node) else {
                return Err(StoreError::NotFound(node));
            };
            if *revision != expected {
                return Err(StoreError::Conflict {
                    node,
                    expected,
                    current: *revision,
                });
            }
            if Phase::transition_writer(current.phase, record.phase).is_none() {
                return Err(StoreError::InvalidTransition {
                    node,
                    from: current.phase,
                    to: record.phase,
                });
            }
            let new_revision = revision.next();
            records.insert(node.clone(), (record, new_revision));
            new_revision
        };
        debug!(node = %node, revision = %new_revision, "Updated node record");
        self.notify_changed(&node);
        Ok(new_revision)
    }

    fn watch(&self) -> broadcast::Receiver<NodeName> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::record::NodeRecord;

    fn record(name: &str) -> NodeRecord {
        NodeRecord::new(
            name.parse().unwrap(),
            "zone-a".parse().unwrap(),
            "1.0.0".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let store = MemoryStore::new();
        let rev = store.create(record("worker-0")).await.unwrap();
        assert_eq!(rev, Revision::new(1));

        let got = store.get(&"worker-0".parse().unwrap()).await.unwrap();
        assert_eq!(got.revision, Revision::new(1));
        assert_eq!(got.record.phase, Phase::Idle);

        store.create(record("worker-1")).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        // Deterministic ordering by node name
        assert_eq!(all[0].record.node.as_str(), "worker-0");

        assert!(matches!(
            store.create(record("worker-0")).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get(&"ghost".parse().unwrap()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryStore::new();
        store.create(record("worker-0")).await.unwrap();

        let read = store.get(&"worker-0".parse().unwrap()).await.unwrap();

        // First writer wins.
        let updated = read.record.with_phase(Phase::UpdateAvailable);
        let rev = store.update(read.revision, updated).await.unwrap();
        assert_eq!(rev, Revision::new(2));

        // Second writer with the same base revision gets a conflict.
        let stale = read.record.with_phase(Phase::UpdateAvailable);
        let err = store.update(read.revision, stale).await.unwrap_err();
        assert!(err.is_retryable_conflict());
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let store = MemoryStore::new();
        store.create(record("worker-0")).await.unwrap();

        let read = store.get(&"worker-0".parse().unwrap()).await.unwrap();
        let skipped = read.record.with_phase(Phase::Updating); // skips the queue
        let err = store.update(read.revision, skipped).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(err.is_retryable_conflict());
    }

    #[tokio::test]
    async fn test_concurrent_writers_totally_ordered() {
        let store = Arc::new(MemoryStore::new());
        store.create(record("worker-0")).await.unwrap();
        let node: NodeName = "worker-0".parse().unwrap();

        // Many writers race CAS loops on the same record; every accepted
        // write must observe a fresh revision, so the final revision counts
        // exactly one accepted write per task.
        let writers = 16;
        let mut handles = Vec::new();
        for i in 0..writers {
            let store = Arc::clone(&store);
            let node = node.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let read = store.get(&node).await.unwrap();
                    let mut next = read.record.clone();
                    next.desired_version = Some(format!("2.0.{i}").parse().unwrap());
                    match store.update(read.revision, next).await {
                        Ok(_) => break,
                        Err(StoreError::Conflict { .. }) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let final_read = store.get(&node).await.unwrap();
        assert_eq!(final_read.revision, Revision::new(1 + writers));
    }

    #[tokio::test]
    async fn test_watch_notifies_on_write() {
        let store = MemoryStore::new();
        let mut watch = store.watch();

        store.create(record("worker-0")).await.unwrap();
        let notified = watch.recv().await.unwrap();
        assert_eq!(notified.as_str(), "worker-0");

        let read = store.get(&notified).await.unwrap();
        store
            .update(read.revision, read.record.with_phase(Phase::UpdateAvailable))
            .await
            .unwrap();
        let notified = watch.recv().await.unwrap();
        assert_eq!(notified.as_str(), "worker-0");
    }

    #[tokio::test]
    async fn test_injected_unavailability() {
        let store = MemoryStore::new();
        store.inject_unavailable(1);
        assert!(matches!(
            store.create(record("worker-0")).await,
            Err(StoreError::Unavailable(_))
        ));
        // Recovers after the injected failure is consumed.
        store.create(record("worker-0")).await.unwrap();
    }
}
