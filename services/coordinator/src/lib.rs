//! rollout Update Coordinator
//!
//! Cluster-scoped counterpart of the per-node agent. The coordinator:
//!
//! - Watches every node state record
//! - Admits a bounded number of concurrent updates per partition, FIFO
//! - Cordons and drains a node before its agent may touch the OS
//! - Uncordons and releases the slot when the update completes or fails
//!
//! Reconciliation is level-triggered: every pass recomputes the admitted
//! set from a fresh snapshot, so duplicated or missed watch notifications
//! cannot desynchronize the slot accounting. Exactly one coordinator is
//! active at a time; leader election lives outside this crate.

pub mod admission;
pub mod cluster;
pub mod config;
pub mod reconciler;
pub mod worker;
