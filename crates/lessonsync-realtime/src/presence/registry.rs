//! Per-tab registry of presence trackers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use lessonsync_core::config::PresenceConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::identity::IdentityProvider;
use lessonsync_core::traits::store::DocumentStore;
use lessonsync_core::types::{TabId, UserId};
use lessonsync_entity::presence::PresenceProfile;

use super::lifecycle::TeardownReason;
use super::tracker::PresenceTracker;

/// Holds at most one active tracker per tab.
///
/// Initialization and teardown for the whole registry are serialized by a
/// single lock, so two racing `initialize` calls for one tab can never leave
/// two heartbeat loops running.
#[derive(Debug)]
pub struct PresenceRegistry {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    trackers: Mutex<HashMap<TabId, Arc<PresenceTracker>>>,
    /// Number of heartbeat loops currently running.
    heartbeats: Arc<AtomicUsize>,
}

impl PresenceRegistry {
    /// Create an empty registry. Fails on an invalid presence configuration.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: PresenceConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
            trackers: Mutex::new(HashMap::new()),
            heartbeats: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Start tracking `user_id` in `tab_id`.
    ///
    /// Returns the existing tracker when the same user is already tracked in
    /// this tab. A different user's tracker is torn down first.
    pub async fn initialize(
        &self,
        tab_id: TabId,
        user_id: UserId,
        profile: PresenceProfile,
    ) -> Arc<PresenceTracker> {
        let mut trackers = self.trackers.lock().await;

        if let Some(existing) = trackers.get(&tab_id) {
            if existing.user_id() == user_id && existing.is_active() {
                tracing::debug!(%tab_id, %user_id, "Presence already tracked for tab");
                return Arc::clone(existing);
            }
        }

        if let Some(previous) = trackers.remove(&tab_id) {
            tracing::info!(
                %tab_id,
                previous_user = %previous.user_id(),
                %user_id,
                "Replacing presence tracker for tab"
            );
            previous.teardown(TeardownReason::UserSwitch).await;
        }

        let tracker = PresenceTracker::start(
            tab_id,
            user_id,
            profile,
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            &self.config,
            &self.heartbeats,
        )
        .await;
        trackers.insert(tab_id, Arc::clone(&tracker));
        tracker
    }

    /// Start tracking whoever the identity provider says is signed in.
    ///
    /// With nobody signed in, any tracker for the tab is torn down and
    /// `None` is returned.
    pub async fn initialize_current(
        &self,
        tab_id: TabId,
        identity: &dyn IdentityProvider,
        user_agent: Option<String>,
    ) -> AppResult<Option<Arc<PresenceTracker>>> {
        match identity.current_identity().await? {
            Some(current) => {
                let profile = PresenceProfile {
                    role: current.role,
                    email: current.email,
                    user_agent,
                };
                Ok(Some(self.initialize(tab_id, current.user_id, profile).await))
            }
            None => {
                self.teardown(tab_id, TeardownReason::Logout).await;
                Ok(None)
            }
        }
    }

    /// Tear down the tracker for a tab. A tab with no tracker is a no-op.
    pub async fn teardown(&self, tab_id: TabId, reason: TeardownReason) {
        let removed = self.trackers.lock().await.remove(&tab_id);
        if let Some(tracker) = removed {
            tracker.teardown(reason).await;
        }
    }

    /// Tear down every tracker.
    pub async fn teardown_all(&self, reason: TeardownReason) {
        let drained: Vec<_> = self.trackers.lock().await.drain().map(|(_, t)| t).collect();
        for tracker in drained {
            tracker.teardown(reason).await;
        }
    }

    /// The tracker for a tab, if any.
    pub async fn tracker(&self, tab_id: TabId) -> Option<Arc<PresenceTracker>> {
        self.trackers.lock().await.get(&tab_id).cloned()
    }

    /// Number of tabs with a tracker.
    pub async fn len(&self) -> usize {
        self.trackers.lock().await.len()
    }

    /// Whether no tab has a tracker.
    pub async fn is_empty(&self) -> bool {
        self.trackers.lock().await.is_empty()
    }

    /// Number of heartbeat loops currently running.
    pub fn active_heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}
