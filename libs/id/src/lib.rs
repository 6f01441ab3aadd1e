//! # rollout-id
//!
//! Validated identifier types for the rollout fleet updater.
//!
//! ## Design Principles
//!
//! - Identifiers are externally supplied (node names come from the cluster,
//!   versions from the update source); this crate validates, never generates
//! - All identifiers have a canonical string representation with strict parsing
//! - Identifiers support roundtrip serialization (parse → format → parse)
//! - Identifiers are typed to prevent mixing different kinds of labels
//!
//! ## Types
//!
//! - [`NodeName`]: DNS-subdomain-style cluster node name
//! - [`PartitionKey`]: grouping label bounding concurrent disruption
//! - [`VersionId`]: opaque OS version identifier

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
