//! # rollout-reconcile
//!
//! The conflict resolver: the retry discipline both the agent and the
//! coordinator use when writing a node state record, since multiple writers
//! race on the same record.
//!
//! # Invariants
//!
//! - Mutations are idempotent functions of current state, never blind
//!   deltas; the record is re-read before every retry
//! - Conflicts are expected and retried with short backoff; transient
//!   infrastructure failures use a separate, longer backoff
//! - A mutation that declines to change anything produces no write

mod backoff;
mod commit;

pub use backoff::Backoff;
pub use commit::{
    commit, CommitError, RetryConfig, DEFAULT_CONFLICT_RETRY_LIMIT, DEFAULT_INFRA_RETRY_LIMIT,
};
