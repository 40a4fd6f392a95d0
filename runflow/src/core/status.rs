//! Run lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a run.
///
/// Status only moves forward: `Queued -> Running -> {Complete | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, worker not yet started.
    #[default]
    Queued,
    /// Worker is executing the pipeline.
    Running,
    /// Pipeline finished successfully.
    Complete,
    /// Pipeline aborted.
    Error,
}

impl RunStatus {
    /// Returns true for `Complete` and `Error`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether `self -> next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Complete)
                | (Self::Running, Self::Error)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}
