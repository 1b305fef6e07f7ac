//! What an observer of a live session is shown.

use chrono::{DateTime, Utc};

use lessonsync_entity::session::{ConnectedStudentEntry, LiveSession};

/// A live session as rendered at one instant.
///
/// `elapsed` and `active_students` are derived here and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// The session document as last observed.
    pub session: LiveSession,
    /// Time since start, frozen once the session ends.
    pub elapsed: Option<chrono::Duration>,
    /// Roster entries whose last activity is inside the staleness window.
    pub active_students: Vec<ConnectedStudentEntry>,
}

impl SessionView {
    /// Derive a view of `session` at `now`.
    pub fn build(session: LiveSession, now: DateTime<Utc>, roster_stale: chrono::Duration) -> Self {
        Self {
            elapsed: session.elapsed(now),
            active_students: session.active_students(now, roster_stale),
            session,
        }
    }

    /// Whole seconds since start, for timer displays.
    pub fn elapsed_seconds(&self) -> Option<i64> {
        self.elapsed.map(|d| d.num_seconds())
    }
}
