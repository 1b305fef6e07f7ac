//! Presence record: the single source of truth for a user's liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use lessonsync_core::types::{Role, UserId};

use super::{PresenceStatus, effective_status};

/// Client environment details that ride along with a presence record.
///
/// Changes here never flip the online/offline status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMetadata {
    /// Client user agent string.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Whether the client's tab/window is currently visible.
    #[serde(default = "default_true")]
    pub tab_visible: bool,
    /// Whether the client believes it has network connectivity.
    #[serde(default = "default_true")]
    pub network_online: bool,
    /// When the metadata was last written.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for PresenceMetadata {
    fn default() -> Self {
        Self {
            user_agent: None,
            tab_visible: true,
            network_online: true,
            timestamp: None,
        }
    }
}

/// Static facts about the tracked user, supplied at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceProfile {
    /// Participant role.
    pub role: Role,
    /// Contact email.
    pub email: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

/// Persisted presence document (`presence/{userId}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Owner of this record and its only writer.
    pub user_id: UserId,
    /// Last status the owner wrote. Not trustworthy on its own.
    pub status: PresenceStatus,
    /// Time of the most recent heartbeat.
    pub last_heartbeat: DateTime<Utc>,
    /// Time of the most recent write of any kind.
    pub last_seen: DateTime<Utc>,
    /// Participant role.
    pub role: Role,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Client environment.
    #[serde(default)]
    pub metadata: PresenceMetadata,
}

impl PresenceRecord {
    /// Build the record written when a tracker comes up.
    pub fn online(user_id: UserId, profile: &PresenceProfile, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Online,
            last_heartbeat: now,
            last_seen: now,
            role: profile.role,
            email: profile.email.clone(),
            metadata: PresenceMetadata {
                user_agent: profile.user_agent.clone(),
                tab_visible: true,
                network_online: true,
                timestamp: Some(now),
            },
        }
    }

    /// Status a reader should believe at `now`.
    pub fn effective_status(
        &self,
        now: DateTime<Utc>,
        stale_threshold: chrono::Duration,
    ) -> PresenceStatus {
        effective_status(self.status, self.last_heartbeat, now, stale_threshold)
    }

    /// How long ago the last heartbeat landed.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_heartbeat
    }

    /// Fields rewritten by every heartbeat tick.
    pub fn heartbeat_patch(now: DateTime<Utc>) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("status".to_string(), json!(PresenceStatus::Online));
        patch.insert("lastHeartbeat".to_string(), json!(now));
        patch.insert("lastSeen".to_string(), json!(now));
        patch
    }

    /// Fields written on an explicit sign-out.
    pub fn offline_patch(now: DateTime<Utc>) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("status".to_string(), json!(PresenceStatus::Offline));
        patch.insert("lastSeen".to_string(), json!(now));
        patch
    }

    /// Fields written when only the client environment changed.
    pub fn metadata_patch(metadata: &PresenceMetadata) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("metadata".to_string(), json!(metadata));
        patch
    }
}

fn default_true() -> bool {
    true
}
