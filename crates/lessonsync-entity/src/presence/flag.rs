//! Denormalized online flag kept on the user document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PresenceRecord, PresenceStatus};

/// Projection of a [`PresenceRecord`] onto `users/{userId}`.
///
/// Written only by the reconciliation worker; eventually consistent with
/// the presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFlag {
    /// Effective online status at projection time.
    pub is_online: bool,
    /// Heartbeat time copied from the presence record.
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Last heartbeat observed while the user was effectively online.
    #[serde(default)]
    pub last_online: Option<DateTime<Utc>>,
    /// When the user became offline; `None` while online.
    #[serde(default)]
    pub offline_at: Option<DateTime<Utc>>,
    /// When the projection was written.
    pub updated_at: DateTime<Utc>,
}

impl UserFlag {
    /// Project a presence record (or its absence) into a flag.
    ///
    /// The result depends only on the record and `previous`, apart from
    /// `updated_at`, so re-projecting an unchanged record yields a flag for
    /// which [`UserFlag::same_state`] holds.
    pub fn project(
        record: Option<&PresenceRecord>,
        previous: Option<&UserFlag>,
        now: DateTime<Utc>,
        stale_threshold: chrono::Duration,
    ) -> Self {
        let Some(record) = record else {
            return Self {
                is_online: false,
                last_heartbeat: previous.and_then(|p| p.last_heartbeat),
                last_online: previous.and_then(|p| p.last_online),
                offline_at: previous.and_then(|p| p.offline_at),
                updated_at: now,
            };
        };

        match record.effective_status(now, stale_threshold) {
            PresenceStatus::Online => Self {
                is_online: true,
                last_heartbeat: Some(record.last_heartbeat),
                last_online: Some(record.last_heartbeat),
                offline_at: None,
                updated_at: now,
            },
            PresenceStatus::Offline => {
                let offline_at = if record.status == PresenceStatus::Offline {
                    record.last_seen
                } else {
                    record.last_heartbeat + stale_threshold
                };
                let last_online = previous
                    .and_then(|p| p.last_online)
                    .max(Some(record.last_heartbeat));
                Self {
                    is_online: false,
                    last_heartbeat: Some(record.last_heartbeat),
                    last_online,
                    offline_at: Some(offline_at),
                    updated_at: now,
                }
            }
        }
    }

    /// Equality ignoring `updated_at`.
    pub fn same_state(&self, other: &UserFlag) -> bool {
        self.is_online == other.is_online
            && self.last_heartbeat == other.last_heartbeat
            && self.last_online == other.last_online
            && self.offline_at == other.offline_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::record::PresenceProfile;
    use chrono::Duration;
    use lessonsync_core::types::{Role, UserId};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn record_at(secs: i64) -> PresenceRecord {
        let profile = PresenceProfile {
            role: Role::Student,
            email: None,
            user_agent: None,
        };
        PresenceRecord::online(UserId::new(), &profile, t(secs))
    }

    #[test]
    fn test_fresh_record_projects_online() {
        let flag = UserFlag::project(Some(&record_at(0)), None, t(10), Duration::seconds(60));
        assert!(flag.is_online);
        assert_eq!(flag.offline_at, None);
        assert_eq!(flag.last_online, Some(t(0)));
    }

    #[test]
    fn test_stale_record_projects_offline_at_threshold() {
        let flag = UserFlag::project(Some(&record_at(0)), None, t(70), Duration::seconds(60));
        assert!(!flag.is_online);
        assert_eq!(flag.offline_at, Some(t(60)));
    }

    #[test]
    fn test_reprojection_is_stable() {
        let record = record_at(0);
        let first = UserFlag::project(Some(&record), None, t(70), Duration::seconds(60));
        let second = UserFlag::project(Some(&record), Some(&first), t(95), Duration::seconds(60));
        assert!(first.same_state(&second));
        assert_ne!(first.updated_at, second.updated_at);
    }

    #[test]
    fn test_missing_record_is_offline() {
        let flag = UserFlag::project(None, None, t(0), Duration::seconds(60));
        assert!(!flag.is_online);
    }
}
