//! Presence domain entities.

pub mod flag;
pub mod record;

pub use flag::UserFlag;
pub use record::{PresenceMetadata, PresenceProfile, PresenceRecord};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored or derived connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The user's tracker is running and heartbeating.
    Online,
    /// The user signed out, or nothing proves otherwise.
    Offline,
}

impl PresenceStatus {
    /// Check if the status is online.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PresenceStatus {
    type Err = lessonsync_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            _ => Err(lessonsync_core::AppError::validation(format!(
                "Invalid presence status: '{s}'"
            ))),
        }
    }
}

/// Derive the status a reader should believe.
///
/// Offline when the stored status says so, or when the last heartbeat is
/// older than `stale_threshold`. A stored `online` is never taken at face
/// value.
pub fn effective_status(
    stored: PresenceStatus,
    last_heartbeat: DateTime<Utc>,
    now: DateTime<Utc>,
    stale_threshold: chrono::Duration,
) -> PresenceStatus {
    if stored == PresenceStatus::Offline || now - last_heartbeat > stale_threshold {
        PresenceStatus::Offline
    } else {
        PresenceStatus::Online
    }
}
