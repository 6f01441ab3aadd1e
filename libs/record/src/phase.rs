//! Update lifecycle phases and the transition table.
//!
//! The phase enum is closed and every legal transition is listed
//! explicitly, together with the side allowed to write it. Anything
//! outside the table is rejected by the store.

use serde::{Deserialize, Serialize};

/// The side allowed to write a given phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Writer {
    /// The per-node agent.
    Agent,
    /// The cluster-wide coordinator.
    Coordinator,
    /// A human operator (manual recovery only).
    Operator,
}

/// Update lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No update in progress.
    Idle,
    /// The update source reported a newer version.
    UpdateAvailable,
    /// The agent requested a concurrency slot and is waiting for admission.
    WaitingForAdmission,
    /// The coordinator is cordoning and draining the node.
    Draining,
    /// The agent is staging the update image.
    Updating,
    /// The staged image is applied across a reboot.
    Rebooting,
    /// The node is back up and running its post-update health check.
    Verifying,
    /// The update succeeded; the coordinator has yet to release the slot.
    Completed,
    /// The update failed; requires manual operator recovery.
    Errored,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::UpdateAvailable => "update_available",
            Self::WaitingForAdmission => "waiting_for_admission",
            Self::Draining => "draining",
            Self::Updating => "updating",
            Self::Rebooting => "rebooting",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "update_available" => Some(Self::UpdateAvailable),
            "waiting_for_admission" => Some(Self::WaitingForAdmission),
            "draining" => Some(Self::Draining),
            "updating" => Some(Self::Updating),
            "rebooting" => Some(Self::Rebooting),
            "verifying" => Some(Self::Verifying),
            "completed" => Some(Self::Completed),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }

    /// Returns true if the node is in a disruptive phase, i.e. occupies a
    /// concurrency slot in its partition.
    pub fn is_disruptive(&self) -> bool {
        matches!(
            self,
            Self::Draining | Self::Updating | Self::Rebooting | Self::Verifying
        )
    }

    /// Returns true for phases in the middle of an update cycle, from which
    /// an unrecoverable failure moves the node to [`Phase::Errored`].
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::UpdateAvailable
                | Self::WaitingForAdmission
                | Self::Draining
                | Self::Updating
                | Self::Rebooting
                | Self::Verifying
        )
    }

    /// The side that drives transitions out of this phase.
    pub fn owner(&self) -> Writer {
        match self {
            Self::Idle | Self::UpdateAvailable | Self::Updating | Self::Rebooting
            | Self::Verifying => Writer::Agent,
            Self::WaitingForAdmission | Self::Draining | Self::Completed => Writer::Coordinator,
            Self::Errored => Writer::Operator,
        }
    }

    /// Looks up a transition in the table.
    ///
    /// Returns the writer allowed to perform it, or `None` if the
    /// transition is illegal. Writing the same phase again is treated as an
    /// attribute-only update and attributed to the phase owner.
    pub fn transition_writer(from: Phase, to: Phase) -> Option<Writer> {
        use Phase::*;
        match (from, to) {
            (a, b) if a == b => Some(a.owner()),
            (Idle, UpdateAvailable) => Some(Writer::Agent),
            (UpdateAvailable, WaitingForAdmission) => Some(Writer::Agent),
            (WaitingForAdmission, Draining) => Some(Writer::Coordinator),
            (Draining, Updating) => Some(Writer::Coordinator),
            (Updating, Rebooting) => Some(Writer::Agent),
            (Rebooting, Verifying) => Some(Writer::Agent),
            (Verifying, Completed) => Some(Writer::Agent),
            (Completed, Idle) => Some(Writer::Coordinator),
            (Errored, Idle) => Some(Writer::Operator),
            (from, Errored) if from.is_active() => Some(from.owner()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
