//! Presence tracker: one user's heartbeat loop for one tab.
//!
//! The tracker is the only writer of its user's presence record. It writes
//! the full record on start, rewrites `lastHeartbeat` on every tick, and
//! marks the record offline on teardown. Every write is best effort: a
//! failure is logged and the next tick is the retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use lessonsync_core::config::PresenceConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::store::{DocumentStore, encode};
use lessonsync_core::types::{TabId, UserId};
use lessonsync_entity::presence::{PresenceMetadata, PresenceProfile, PresenceRecord};
use lessonsync_store::keys;

use super::lifecycle::{LifecycleEvent, TeardownReason};

/// Counts running heartbeat loops. Shared by a registry and its trackers.
#[derive(Debug)]
struct GaugeGuard(Arc<AtomicUsize>);

impl GaugeGuard {
    fn acquire(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(gauge))
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything the heartbeat loop needs, cloned out of the tracker.
#[derive(Debug, Clone)]
struct HeartbeatContext {
    user_id: UserId,
    key: String,
    profile: PresenceProfile,
    metadata: Arc<Mutex<PresenceMetadata>>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl HeartbeatContext {
    /// Write the complete record, overwriting whatever is stored.
    async fn write_full_record(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let mut record = PresenceRecord::online(self.user_id, &self.profile, now);
        record.metadata = self.metadata.lock().await.clone();
        self.store.set(&self.key, encode(&record)?).await
    }

    /// Rewrite the heartbeat fields only.
    async fn write_heartbeat(&self) -> AppResult<u64> {
        let now = self.clock.now();
        self.store
            .merge(&self.key, PresenceRecord::heartbeat_patch(now))
            .await
    }
}

/// A running presence tracker for one user in one tab.
#[derive(Debug)]
pub struct PresenceTracker {
    /// Tab hosting this tracker.
    tab_id: TabId,
    /// Context shared with the heartbeat loop.
    ctx: HeartbeatContext,
    /// Stops the heartbeat loop.
    cancel: CancellationToken,
    /// Heartbeat loop task, taken on teardown.
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    /// Set once teardown has begun.
    torn_down: AtomicBool,
}

impl PresenceTracker {
    /// Write the initial online record and start heartbeating.
    ///
    /// Never fails: if the initial write is lost, the first heartbeat tick
    /// writes the full record instead.
    pub async fn start(
        tab_id: TabId,
        user_id: UserId,
        profile: PresenceProfile,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: &PresenceConfig,
        gauge: &Arc<AtomicUsize>,
    ) -> Arc<Self> {
        let metadata = PresenceMetadata {
            user_agent: profile.user_agent.clone(),
            timestamp: Some(clock.now()),
            ..PresenceMetadata::default()
        };
        let ctx = HeartbeatContext {
            user_id,
            key: keys::presence(user_id),
            profile,
            metadata: Arc::new(Mutex::new(metadata)),
            store,
            clock,
        };

        let initial_written = match ctx.write_full_record().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    %user_id,
                    %tab_id,
                    "Initial presence write failed, heartbeat will retry: {}",
                    e
                );
                false
            }
        };

        let cancel = CancellationToken::new();
        let guard = GaugeGuard::acquire(gauge);
        let handle = tokio::spawn(run_heartbeat(
            ctx.clone(),
            config.heartbeat_interval(),
            cancel.clone(),
            initial_written,
            guard,
        ));

        tracing::info!(
            %user_id,
            %tab_id,
            interval_s = config.heartbeat_interval_seconds,
            "Presence tracker started"
        );

        Arc::new(Self {
            tab_id,
            ctx,
            cancel,
            heartbeat: Mutex::new(Some(handle)),
            torn_down: AtomicBool::new(false),
        })
    }

    /// The tracked user.
    pub fn user_id(&self) -> UserId {
        self.ctx.user_id
    }

    /// The tab hosting this tracker.
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Whether the tracker is still heartbeating.
    pub fn is_active(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst)
    }

    /// Current client metadata.
    pub async fn metadata(&self) -> PresenceMetadata {
        self.ctx.metadata.lock().await.clone()
    }

    /// Apply a client lifecycle event.
    ///
    /// Only metadata is written; the online/offline status is left alone so
    /// a tab switch or a network blip never makes the user flap.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        if !self.is_active() {
            tracing::debug!(user_id = %self.ctx.user_id, ?event, "Ignoring lifecycle event after teardown");
            return;
        }

        let snapshot = {
            let mut metadata = self.ctx.metadata.lock().await;
            let changed = match event {
                LifecycleEvent::TabVisibility(visible) => {
                    std::mem::replace(&mut metadata.tab_visible, visible) != visible
                }
                LifecycleEvent::Network(online) => {
                    std::mem::replace(&mut metadata.network_online, online) != online
                }
            };
            if !changed {
                return;
            }
            metadata.timestamp = Some(self.ctx.clock.now());
            metadata.clone()
        };

        if let Err(e) = self
            .ctx
            .store
            .merge(&self.ctx.key, PresenceRecord::metadata_patch(&snapshot))
            .await
        {
            tracing::warn!(user_id = %self.ctx.user_id, ?event, "Presence metadata write failed: {}", e);
        }
    }

    /// Stop heartbeating and mark the user offline.
    ///
    /// Idempotent: only the first call does anything, later calls return
    /// immediately. Never fails; a lost offline write is covered by the
    /// staleness threshold.
    pub async fn teardown(&self, reason: TeardownReason) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        // Wait for an in-flight heartbeat so it cannot land after the offline write.
        if let Some(handle) = self.heartbeat.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(user_id = %self.ctx.user_id, "Heartbeat task ended abnormally: {}", e);
            }
        }

        let now = self.ctx.clock.now();
        match self
            .ctx
            .store
            .merge(&self.ctx.key, PresenceRecord::offline_patch(now))
            .await
        {
            Ok(_) => tracing::info!(
                user_id = %self.ctx.user_id,
                tab_id = %self.tab_id,
                %reason,
                "Presence tracker stopped"
            ),
            Err(e) => tracing::warn!(
                user_id = %self.ctx.user_id,
                %reason,
                "Offline write failed, staleness will take over: {}",
                e
            ),
        }
    }
}

/// Run the heartbeat loop until cancelled.
async fn run_heartbeat(
    ctx: HeartbeatContext,
    period: Duration,
    cancel: CancellationToken,
    mut record_written: bool,
    _gauge: GaugeGuard,
) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let result = if record_written {
                    ctx.write_heartbeat().await
                } else {
                    ctx.write_full_record().await
                };
                match result {
                    Ok(revision) => {
                        record_written = true;
                        tracing::debug!(user_id = %ctx.user_id, revision, "Heartbeat written");
                    }
                    Err(e) => {
                        tracing::warn!(
                            user_id = %ctx.user_id,
                            "Heartbeat write failed, next tick retries: {}",
                            e
                        );
                    }
                }
            }
        }
    }

    tracing::debug!(user_id = %ctx.user_id, "Heartbeat loop ended");
}
