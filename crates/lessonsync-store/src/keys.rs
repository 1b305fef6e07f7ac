//! Document key builders for every collection LessonSync writes.
//!
//! Centralising key construction prevents typos and makes it easy
//! to find every document the workspace touches.

use lessonsync_core::types::{LiveSessionId, UserId};

/// Collection prefix for presence records.
pub const PRESENCE_PREFIX: &str = "presence/";

/// Collection prefix for user documents carrying the online flag.
pub const USERS_PREFIX: &str = "users/";

/// Collection prefix for live session documents.
pub const LIVE_SESSIONS_PREFIX: &str = "liveSessions/";

// ── Presence ───────────────────────────────────────────────

/// Key of a user's presence record.
pub fn presence(user_id: UserId) -> String {
    format!("{PRESENCE_PREFIX}{user_id}")
}

/// Key of a user's document holding the denormalized online flag.
pub fn user_flag(user_id: UserId) -> String {
    format!("{USERS_PREFIX}{user_id}")
}

/// Recover the user id from a presence key.
pub fn user_id_from_presence_key(key: &str) -> Option<UserId> {
    key.strip_prefix(PRESENCE_PREFIX)?.parse().ok()
}

// ── Live sessions ──────────────────────────────────────────

/// Key of a live session document.
pub fn live_session(session_id: LiveSessionId) -> String {
    format!("{LIVE_SESSIONS_PREFIX}{session_id}")
}

/// Recover the session id from a live session key.
pub fn session_id_from_key(key: &str) -> Option<LiveSessionId> {
    key.strip_prefix(LIVE_SESSIONS_PREFIX)?.parse().ok()
}
