//! Scheduling status of a variable within an active set.

use std::fmt;

/// Where a variable is in the update cycle.
///
/// `Idle -> Queued -> Updating -> Idle | Errored`. Statuses only exist while a
/// set is active; deactivation resets every variable to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UpdateStatus {
    /// Settled, nothing pending
    #[default]
    Idle,
    /// Waiting for its dependencies to settle
    Queued,
    /// Update in flight
    Updating,
    /// Last update failed, or was blocked by a failed dependency
    Errored,
}

impl UpdateStatus {
    /// Queued or updating.
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::Updating)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Updating => "updating",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}
