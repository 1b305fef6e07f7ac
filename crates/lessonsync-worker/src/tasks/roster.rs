//! Roster pruning task: removes connected-student entries whose client
//! stopped refreshing them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use lessonsync_core::config::LiveSessionConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::store::{Document, DocumentStore, encode};
use lessonsync_entity::session::{LiveSession, SessionStatus};
use lessonsync_store::keys;

use crate::task::{ReconcileTask, TaskError};

/// Outcome of pruning one session document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PruneOutcome {
    /// Nothing stale, or the session has ended.
    Clean,
    /// Stale entries removed.
    Pruned(usize),
    /// A concurrent writer got there first; the next sweep tries again.
    Conflict,
}

/// Drops roster entries whose `lastActivity` is older than the roster
/// staleness window.
///
/// Readers already hide stale entries; this keeps the stored roster from
/// growing without bound. Writes are compare-and-set against the revision
/// that was read, so a student refreshing concurrently is never erased.
#[derive(Debug)]
pub struct RosterPruneTask {
    /// Document store
    store: Arc<dyn DocumentStore>,
    /// Source of "now"
    clock: Arc<dyn Clock>,
    /// Roster staleness window
    stale_after: chrono::Duration,
}

impl RosterPruneTask {
    /// Create a new roster prune task
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: &LiveSessionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            stale_after: config.roster_stale(),
        }
    }

    async fn prune(&self, document: &Document) -> AppResult<PruneOutcome> {
        let mut session: LiveSession = document.decode()?;
        // Ended sessions keep their final roster.
        if session.status == SessionStatus::Ended {
            return Ok(PruneOutcome::Clean);
        }

        let removed = session.prune_stale(self.clock.now(), self.stale_after);
        if removed.is_empty() {
            return Ok(PruneOutcome::Clean);
        }

        let written = self
            .store
            .compare_and_set(&document.key, encode(&session)?, Some(document.revision))
            .await?;
        if !written {
            return Ok(PruneOutcome::Conflict);
        }

        tracing::debug!(
            "Pruned {} stale students from session {}: {:?}",
            removed.len(),
            session.session_id,
            removed
        );
        Ok(PruneOutcome::Pruned(removed.len()))
    }
}

#[async_trait]
impl ReconcileTask for RosterPruneTask {
    fn name(&self) -> &str {
        "roster_prune"
    }

    async fn run_once(&self) -> Result<Value, TaskError> {
        let documents = self
            .store
            .list(keys::LIVE_SESSIONS_PREFIX)
            .await
            .map_err(|e| TaskError::Transient(format!("Failed to list live sessions: {}", e)))?;

        let mut pruned = 0;
        let mut conflicts = 0;

        for document in &documents {
            match self.prune(document).await {
                Ok(PruneOutcome::Pruned(n)) => pruned += n,
                Ok(PruneOutcome::Conflict) => conflicts += 1,
                Ok(PruneOutcome::Clean) => {}
                Err(e) => {
                    tracing::warn!("Failed to prune roster of '{}': {}", document.key, e);
                }
            }
        }

        if pruned > 0 {
            tracing::info!(
                "Roster prune: {} stale entries removed across {} sessions",
                pruned,
                documents.len()
            );
        }

        Ok(serde_json::json!({
            "task": "roster_prune",
            "sessions_scanned": documents.len(),
            "entries_pruned": pruned,
            "conflicts": conflicts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use lessonsync_core::config::StoreConfig;
    use lessonsync_core::traits::clock::ManualClock;
    use lessonsync_core::types::{ClassId, LessonId, UserId};
    use lessonsync_entity::session::ConnectedStudentEntry;
    use lessonsync_store::memory::MemoryDocumentStore;

    fn origin() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    async fn save(store: &MemoryDocumentStore, session: &LiveSession) {
        store
            .set(&keys::live_session(session.session_id), encode(session).unwrap())
            .await
            .unwrap();
    }

    async fn load(store: &MemoryDocumentStore, session: &LiveSession) -> LiveSession {
        store
            .get(&keys::live_session(session.session_id))
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap()
    }

    fn session_with(students: &[(UserId, i64)], status: SessionStatus) -> LiveSession {
        let mut session =
            LiveSession::scheduled(LessonId::new(), UserId::new(), ClassId::new(), 10);
        session.transition(SessionStatus::Active, origin()).unwrap();
        for (id, seconds) in students {
            let at = origin() + chrono::Duration::seconds(*seconds);
            session.upsert_student(ConnectedStudentEntry::joined(*id, "s", 0, at));
        }
        if status == SessionStatus::Ended {
            session.transition(SessionStatus::Ended, origin()).unwrap();
        }
        session
    }

    #[tokio::test]
    async fn test_prunes_only_stale_entries() {
        let store = Arc::new(MemoryDocumentStore::new(&StoreConfig::default()));
        let clock = Arc::new(ManualClock::new(origin() + chrono::Duration::seconds(100)));
        let task = RosterPruneTask::new(store.clone(), clock, &LiveSessionConfig::default());

        let (stale, fresh) = (UserId::new(), UserId::new());
        let session = session_with(&[(stale, 0), (fresh, 90)], SessionStatus::Active);
        save(&store, &session).await;

        let summary = task.run_once().await.unwrap();
        assert_eq!(summary["entries_pruned"], 1);

        let stored = load(&store, &session).await;
        assert!(stored.student(stale).is_none());
        assert!(stored.student(fresh).is_some());
    }

    #[tokio::test]
    async fn test_ended_sessions_keep_their_roster() {
        let store = Arc::new(MemoryDocumentStore::new(&StoreConfig::default()));
        let clock = Arc::new(ManualClock::new(origin() + chrono::Duration::hours(2)));
        let task = RosterPruneTask::new(store.clone(), clock, &LiveSessionConfig::default());

        let session = session_with(&[(UserId::new(), 0)], SessionStatus::Ended);
        save(&store, &session).await;

        let summary = task.run_once().await.unwrap();
        assert_eq!(summary["entries_pruned"], 0);
        assert_eq!(load(&store, &session).await.connected_students.len(), 1);
    }
}
