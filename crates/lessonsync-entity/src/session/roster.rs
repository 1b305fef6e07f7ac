//! Roster entry for a student connected to a live session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lessonsync_core::types::UserId;

/// One element of `connectedStudents`. Owned by the student it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedStudentEntry {
    /// Student user id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// When the student joined.
    pub joined_at: DateTime<Utc>,
    /// Last heartbeat or navigation.
    pub last_activity: DateTime<Utc>,
    /// Slide the student is looking at.
    #[serde(default)]
    pub current_slide_index: u32,
}

impl ConnectedStudentEntry {
    /// Entry written on join.
    pub fn joined(id: UserId, name: impl Into<String>, slide: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            joined_at: now,
            last_activity: now,
            current_slide_index: slide,
        }
    }

    /// Whether the entry has seen activity within `stale_after`.
    pub fn is_fresh(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        now - self.last_activity <= stale_after
    }
}
