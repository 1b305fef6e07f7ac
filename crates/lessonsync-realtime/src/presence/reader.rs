//! Presence reader: derives effective status from heartbeat age.
//!
//! A stored `online` is never trusted on its own. Readers combine the stored
//! status with the age of the last heartbeat, and a reconciliation tick
//! re-evaluates staleness even when nothing new has been written, so a
//! crashed client decays to offline without anyone writing "offline".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use lessonsync_core::config::PresenceConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::store::{
    Document, DocumentStore, DocumentWatch, WatchEvent, WatchFilter,
};
use lessonsync_core::types::UserId;
use lessonsync_entity::presence::{PresenceRecord, PresenceStatus};
use lessonsync_store::keys;

use crate::subscription::SubscriptionHandle;

/// Effective presence of one user at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Observed user.
    pub user_id: UserId,
    /// Effective status at `observed_at`.
    pub status: PresenceStatus,
    /// Last heartbeat seen, if a record exists.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// When this snapshot was evaluated.
    pub observed_at: DateTime<Utc>,
}

/// Reads presence records and reconciles staleness.
#[derive(Debug, Clone)]
pub struct PresenceReader {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
}

impl PresenceReader {
    /// Create a reader. Fails on an invalid presence configuration.
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
        })
    }

    /// Effective status of a record as of now.
    pub fn effective_status(&self, record: &PresenceRecord) -> PresenceStatus {
        record.effective_status(self.clock.now(), self.config.stale_threshold())
    }

    /// Point-read a user's presence.
    ///
    /// A missing record, an undecodable record, and a failed read all come
    /// back as offline.
    pub async fn snapshot(&self, user_id: UserId) -> PresenceSnapshot {
        let record = match self.store.get(&keys::presence(user_id)).await {
            Ok(document) => decode_record(user_id, document.as_ref()),
            Err(e) => {
                tracing::warn!(%user_id, "Presence read failed, reporting offline: {}", e);
                None
            }
        };
        evaluate(
            user_id,
            record.as_ref(),
            self.clock.now(),
            self.config.stale_threshold(),
        )
    }

    /// Effective status of one user. Fails safe to offline.
    pub async fn status_of(&self, user_id: UserId) -> PresenceStatus {
        self.snapshot(user_id).await.status
    }

    /// Effective status for a batch of users, e.g. a class roster.
    pub async fn online_users(&self, user_ids: &[UserId]) -> HashMap<UserId, PresenceStatus> {
        let statuses = join_all(user_ids.iter().map(|id| self.status_of(*id))).await;
        user_ids.iter().copied().zip(statuses).collect()
    }

    /// Watch a user's effective status.
    ///
    /// The callback receives the first evaluation immediately and then fires
    /// only when the effective status changes, whether the change came from a
    /// new write or from the heartbeat going stale. If the store refuses the
    /// watch, the reconciliation tick re-reads the record instead.
    pub async fn subscribe<F>(&self, user_id: UserId, callback: F) -> SubscriptionHandle
    where
        F: Fn(PresenceSnapshot) + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let key = keys::presence(user_id);

        let watch = match self.store.watch(WatchFilter::Key(key.clone())).await {
            Ok(watch) => Some(watch),
            Err(e) => {
                tracing::warn!(%user_id, "Presence watch unavailable, falling back to reads: {}", e);
                None
            }
        };

        let state = WatchState {
            user_id,
            key,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            stale_threshold: self.config.stale_threshold(),
            record: None,
            revision: 0,
            last_status: None,
        };

        tokio::spawn(run_subscription(
            state,
            watch,
            self.config.reconcile_interval(),
            cancel.clone(),
            callback,
        ));

        SubscriptionHandle::new(cancel)
    }
}

fn decode_record(user_id: UserId, document: Option<&Document>) -> Option<PresenceRecord> {
    let document = document?;
    match document.decode::<PresenceRecord>() {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(%user_id, "Ignoring malformed presence record: {}", e);
            None
        }
    }
}

fn evaluate(
    user_id: UserId,
    record: Option<&PresenceRecord>,
    now: DateTime<Utc>,
    stale_threshold: chrono::Duration,
) -> PresenceSnapshot {
    PresenceSnapshot {
        user_id,
        status: record
            .map(|r| r.effective_status(now, stale_threshold))
            .unwrap_or(PresenceStatus::Offline),
        last_heartbeat: record.map(|r| r.last_heartbeat),
        observed_at: now,
    }
}

/// State owned by one subscription task.
struct WatchState {
    user_id: UserId,
    key: String,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    stale_threshold: chrono::Duration,
    record: Option<PresenceRecord>,
    /// Revision of `record`; 0 when there is none.
    revision: u64,
    last_status: Option<PresenceStatus>,
}

impl WatchState {
    /// Replace the cached record with a fresh read. A failed read keeps
    /// the cached record; staleness still applies to it.
    async fn reload(&mut self) -> AppResult<()> {
        let document = self.store.get(&self.key).await?;
        self.revision = document.as_ref().map(|d| d.revision).unwrap_or(0);
        self.record = decode_record(self.user_id, document.as_ref());
        Ok(())
    }

    fn apply(&mut self, document: Option<Document>) {
        match document {
            Some(doc) if doc.revision > self.revision || self.record.is_none() => {
                self.revision = doc.revision;
                self.record = decode_record(self.user_id, Some(&doc));
            }
            Some(_) => {}
            None => {
                self.revision = 0;
                self.record = None;
            }
        }
    }

    /// Re-evaluate and return a snapshot if the effective status changed.
    fn reconcile(&mut self) -> Option<PresenceSnapshot> {
        let snapshot = evaluate(
            self.user_id,
            self.record.as_ref(),
            self.clock.now(),
            self.stale_threshold,
        );
        if self.last_status == Some(snapshot.status) {
            return None;
        }
        self.last_status = Some(snapshot.status);
        Some(snapshot)
    }
}

async fn next_event(watch: &mut Option<DocumentWatch>) -> Option<WatchEvent> {
    match watch {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

async fn run_subscription<F>(
    mut state: WatchState,
    mut watch: Option<DocumentWatch>,
    period: std::time::Duration,
    cancel: CancellationToken,
    callback: F,
) where
    F: Fn(PresenceSnapshot) + Send + Sync + 'static,
{
    if let Err(e) = state.reload().await {
        tracing::warn!(user_id = %state.user_id, "Initial presence read failed: {}", e);
    }
    if let Some(snapshot) = state.reconcile() {
        callback(snapshot);
    }

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = next_event(&mut watch) => match event {
                Some(WatchEvent::Changed(change)) => state.apply(change.document),
                Some(WatchEvent::Lagged(_)) => {
                    if let Err(e) = state.reload().await {
                        tracing::warn!(user_id = %state.user_id, "Presence resync failed: {}", e);
                    }
                }
                None => {
                    tracing::warn!(user_id = %state.user_id, "Presence watch closed, falling back to reads");
                    watch = None;
                }
            },
            _ = ticker.tick() => {
                if watch.is_none() {
                    if let Err(e) = state.reload().await {
                        tracing::debug!(user_id = %state.user_id, "Presence read failed: {}", e);
                    }
                }
            }
        }

        if let Some(snapshot) = state.reconcile() {
            tracing::debug!(user_id = %snapshot.user_id, status = %snapshot.status, "Presence changed");
            callback(snapshot);
        }
    }

    tracing::debug!(user_id = %state.user_id, "Presence subscription stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lessonsync_core::config::StoreConfig;
    use lessonsync_core::traits::clock::{ManualClock, TokioClock};
    use lessonsync_core::traits::store::encode;
    use lessonsync_core::types::Role;
    use lessonsync_entity::presence::PresenceProfile;
    use lessonsync_store::fault::FaultInjectingStore;
    use lessonsync_store::memory::MemoryDocumentStore;
    use tokio::sync::mpsc;

    fn origin() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn record(user_id: UserId, at: DateTime<Utc>) -> PresenceRecord {
        let profile = PresenceProfile {
            role: Role::Student,
            email: None,
            user_agent: None,
        };
        PresenceRecord::online(user_id, &profile, at)
    }

    async fn put(store: &dyn DocumentStore, record: &PresenceRecord) {
        store
            .set(&keys::presence(record.user_id), encode(record).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_of_fails_safe() {
        let inner = Arc::new(MemoryDocumentStore::new(&StoreConfig::default()));
        let faulty = Arc::new(FaultInjectingStore::new(inner.clone()));
        let clock = Arc::new(ManualClock::new(origin()));
        let reader = PresenceReader::new(faulty.clone(), clock, PresenceConfig::default()).unwrap();

        let user = UserId::new();
        assert_eq!(reader.status_of(user).await, PresenceStatus::Offline);

        put(inner.as_ref(), &record(user, origin())).await;
        assert_eq!(reader.status_of(user).await, PresenceStatus::Online);

        faulty.fail_reads(true);
        assert_eq!(reader.status_of(user).await, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn test_stale_online_record_reads_offline() {
        let store = Arc::new(MemoryDocumentStore::new(&StoreConfig::default()));
        let clock = Arc::new(ManualClock::new(origin()));
        let reader = PresenceReader::new(store.clone(), clock.clone(), PresenceConfig::default()).unwrap();
        let user = UserId::new();
        put(store.as_ref(), &record(user, origin())).await;

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(reader.status_of(user).await, PresenceStatus::Online);
        clock.advance(chrono::Duration::seconds(1));
        let snapshot = reader.snapshot(user).await;
        assert_eq!(snapshot.status, PresenceStatus::Offline);
        assert_eq!(snapshot.last_heartbeat, Some(origin()));
    }

    #[tokio::test]
    async fn test_online_users_batch() {
        let store = Arc::new(MemoryDocumentStore::new(&StoreConfig::default()));
        let clock = Arc::new(ManualClock::new(origin()));
        let reader = PresenceReader::new(store.clone(), clock, PresenceConfig::default()).unwrap();
        let online = UserId::new();
        let missing = UserId::new();
        put(store.as_ref(), &record(online, origin())).await;

        let statuses = reader.online_users(&[online, missing]).await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[&online], PresenceStatus::Online);
        assert_eq!(statuses[&missing], PresenceStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_decays_silent_user_to_offline() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(origin()));
        let store = Arc::new(MemoryDocumentStore::with_clock(&StoreConfig::default(), clock.clone()));
        let reader = PresenceReader::new(store.clone(), clock, PresenceConfig::default()).unwrap();
        let user = UserId::new();
        put(store.as_ref(), &record(user, origin())).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = reader
            .subscribe(user, move |snapshot| {
                let _ = tx.send(snapshot);
            })
            .await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, PresenceStatus::Online);

        time::sleep(Duration::from_secs(50)).await;
        assert!(rx.try_recv().is_err(), "still online at t=50");

        let offline = rx.recv().await.unwrap();
        assert_eq!(offline.status, PresenceStatus::Offline);
        assert!(offline.observed_at <= origin() + chrono::Duration::seconds(70));

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_fires_only_on_change() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(origin()));
        let store = Arc::new(MemoryDocumentStore::with_clock(&StoreConfig::default(), clock.clone()));
        let reader = PresenceReader::new(store.clone(), clock.clone(), PresenceConfig::default()).unwrap();
        let user = UserId::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = reader
            .subscribe(user, move |snapshot| {
                let _ = tx.send(snapshot.status);
            })
            .await;
        assert_eq!(rx.recv().await.unwrap(), PresenceStatus::Offline);

        put(store.as_ref(), &record(user, clock.now())).await;
        assert_eq!(rx.recv().await.unwrap(), PresenceStatus::Online);

        for _ in 0..4 {
            time::sleep(Duration::from_secs(20)).await;
            store
                .merge(&keys::presence(user), PresenceRecord::heartbeat_patch(clock.now()))
                .await
                .unwrap();
        }
        time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err(), "heartbeats alone never re-notify");

        store
            .merge(&keys::presence(user), PresenceRecord::offline_patch(clock.now()))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), PresenceStatus::Offline);

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_without_watch_polls_on_tick() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(origin()));
        let inner = Arc::new(MemoryDocumentStore::with_clock(&StoreConfig::default(), clock.clone()));
        let faulty = Arc::new(FaultInjectingStore::new(inner.clone()));
        faulty.fail_watch(true);
        let reader = PresenceReader::new(faulty, clock.clone(), PresenceConfig::default()).unwrap();
        let user = UserId::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = reader
            .subscribe(user, move |snapshot| {
                let _ = tx.send(snapshot.status);
            })
            .await;
        assert_eq!(rx.recv().await.unwrap(), PresenceStatus::Offline);

        put(inner.as_ref(), &record(user, clock.now())).await;
        assert_eq!(rx.recv().await.unwrap(), PresenceStatus::Online);
    }
}
