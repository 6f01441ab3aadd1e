//! # rollout-record
//!
//! The node state record: the versioned, externally stored attribute set
//! that represents one node's update lifecycle, plus the store contract
//! used to read and write it.
//!
//! # Invariants
//!
//! - Exactly one of {agent, coordinator} legitimately writes any single
//!   phase transition; the store rejects transitions outside the table
//! - A record's revision strictly increases on every accepted write
//! - The phase never regresses except the operator recovery Errored → Idle

mod phase;
mod record;
mod store;

pub use phase::{Phase, Writer};
pub use record::{ErrorCode, ErrorReason, NodeRecord, Revision, VersionedRecord};
pub use store::{MemoryStore, RecordStore, StoreError};
