//! The per-node state record and its revision token.

use chrono::{DateTime, Utc};
use rollout_id::{NodeName, PartitionKey, VersionId};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Optimistic-concurrency revision token.
///
/// Strictly increases on every accepted write; a write succeeds only if the
/// revision it was read at is still current.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Revision(u64);

impl Revision {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The revision following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured cause attached to a record in the errored phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReason {
    pub code: ErrorCode,
    pub message: String,
}

/// Closed set of failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DrainTimeout,
    DrainFailed,
    UpdateFailed,
    HealthCheckFailed,
}

impl ErrorReason {
    pub fn drain_timeout() -> Self {
        Self {
            code: ErrorCode::DrainTimeout,
            message: "drain timeout".to_string(),
        }
    }

    pub fn drain_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::DrainFailed,
            message: message.into(),
        }
    }

    pub fn update_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::UpdateFailed,
            message: message.into(),
        }
    }

    pub fn health_check_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::HealthCheckFailed,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// One node's update lifecycle state, as stored on the node object.
///
/// Written by exactly one side at a time per the transition table in
/// [`Phase::transition_writer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node this record belongs to.
    pub node: NodeName,

    /// Grouping label bounding concurrent disruption.
    pub partition: PartitionKey,

    /// Current lifecycle phase.
    pub phase: Phase,

    /// Version the node is currently running.
    pub current_version: VersionId,

    /// Version the node should move to, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_version: Option<VersionId>,

    /// Failure cause; set only while the phase is errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorReason>,

    /// When the record entered waiting-for-admission. Basis for FIFO
    /// admission ordering within a partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_since: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Creates the initial idle record for a freshly registered node.
    pub fn new(node: NodeName, partition: PartitionKey, current_version: VersionId) -> Self {
        Self {
            node,
            partition,
            phase: Phase::Idle,
            current_version,
            desired_version: None,
            last_error: None,
            waiting_since: None,
        }
    }

    /// Returns a copy advanced to the given phase, clearing attributes that
    /// only make sense in the phase being left.
    #[must_use]
    pub fn with_phase(&self, phase: Phase) -> Self {
        let mut next = self.clone();
        next.phase = phase;
        if phase != Phase::Errored {
            next.last_error = None;
        }
        if !matches!(phase, Phase::WaitingForAdmission) {
            // waiting_since only orders the admission queue; keep it while
            // waiting, drop it once the node moves on.
            if phase != Phase::Draining {
                next.waiting_since = None;
            }
        }
        next
    }

    /// Returns a copy moved to the errored phase with the given cause.
    #[must_use]
    pub fn with_error(&self, reason: ErrorReason) -> Self {
        let mut next = self.with_phase(Phase::Errored);
        next.last_error = Some(reason);
        next
    }
}

/// A record together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub record: NodeRecord,
    pub revision: Revision,
}
