//! Live session domain entities.

pub mod model;
pub mod roster;

pub use model::LiveSession;
pub use roster::ConnectedStudentEntry;

use serde::{Deserialize, Serialize};

/// Lifecycle of a live session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created but not yet started by the teacher.
    Scheduled,
    /// Running; the slide pointer may move.
    Active,
    /// Finished. Terminal.
    Ended,
}

impl SessionStatus {
    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Active)
                | (Self::Scheduled, Self::Ended)
                | (Self::Active, Self::Ended)
        )
    }

    /// Whether the session accepts slide changes.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
