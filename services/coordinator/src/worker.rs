//! Coordinator run loop.
//!
//! Wakes on a periodic tick or on any record change notification and runs a
//! full reconciliation pass. Because every pass recomputes the admitted set
//! from a fresh listing, a burst of notifications collapses into at most one
//! extra pass and a lost notification costs at most one interval of latency.

use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::reconciler::CoordinatorReconciler;

/// Drives [`CoordinatorReconciler`] until shutdown.
pub struct CoordinatorWorker {
    reconciler: CoordinatorReconciler,
    reconcile_interval: Duration,
}

impl CoordinatorWorker {
    pub fn new(reconciler: CoordinatorReconciler, reconcile_interval: Duration) -> Self {
        Self {
            reconciler,
            reconcile_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.reconcile_interval.as_secs(),
            "Starting coordinator reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.reconcile_interval);
        let mut notifications = self.reconciler.watch();
        let mut watch_open = true;

        loop {
            let mut wake = false;
            tokio::select! {
                _ = interval.tick() => {
                    wake = true;
                }
                changed = notifications.recv(), if watch_open => {
                    match changed {
                        // Any node's record may change the admission picture.
                        Ok(node) => {
                            debug!(node = %node, "Record changed");
                            wake = true;
                        }
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
                        info!("Coordinator shutting down");
                        break;
                    }
                }
            }

            if wake {
                if let Err(e) = self.reconciler.reconcile_all().await {
                    warn!(error = %e, "Coordinator pass failed");
                }
            }
        }
    }
}
