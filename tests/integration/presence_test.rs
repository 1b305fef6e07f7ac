//! Integration tests for presence tracking, reading, and projection.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use lessonsync_core::traits::store::DocumentStore;
use lessonsync_core::types::{Role, TabId, UserId};
use lessonsync_entity::presence::{PresenceRecord, PresenceStatus, UserFlag};
use lessonsync_realtime::{LifecycleEvent, TeardownReason};
use lessonsync_store::keys;
use lessonsync_worker::ReconcileTask;

use helpers::{TestEnv, at, profile};

#[tokio::test(start_paused = true)]
async fn test_crashed_client_is_online_at_50s_and_offline_at_70s() {
    let env = TestEnv::new();
    let registry = env.registry();
    let reader = env.reader();
    let user = UserId::new();

    registry.initialize(TabId::new(), user, profile(Role::Student)).await;
    // The client dies: nothing it writes reaches the store any more.
    env.store.fail_writes(true);

    time::sleep(Duration::from_secs(50)).await;
    assert_eq!(reader.status_of(user).await, PresenceStatus::Online);

    time::sleep(Duration::from_secs(20)).await;
    assert_eq!(reader.status_of(user).await, PresenceStatus::Offline);

    // The stored status still says online; only the reader's view decayed.
    let record: PresenceRecord = env
        .inner
        .get(&keys::presence(user))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(record.status, PresenceStatus::Online);
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_sees_crash_without_an_offline_write() {
    let env = TestEnv::new();
    let registry = env.registry();
    let reader = env.reader();
    let user = UserId::new();

    registry.initialize(TabId::new(), user, profile(Role::Student)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = reader
        .subscribe(user, move |snapshot| {
            let _ = tx.send((snapshot.status, snapshot.observed_at));
        })
        .await;
    assert_eq!(rx.recv().await.unwrap().0, PresenceStatus::Online);

    // Healthy heartbeats for two minutes: no notifications.
    time::sleep(Duration::from_secs(125)).await;
    assert!(rx.try_recv().is_err());

    // Last heartbeat landed at t=120; the client then dies.
    env.store.fail_writes(true);
    let (status, observed_at) = rx.recv().await.unwrap();
    assert_eq!(status, PresenceStatus::Offline);
    assert!(observed_at > at(180));
    assert!(observed_at <= at(190));

    subscription.stop();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_initialize_runs_one_heartbeat_timer() {
    let env = TestEnv::new();
    let registry = env.registry();
    let tab = TabId::new();
    let user = UserId::new();

    for _ in 0..4 {
        registry.initialize(tab, user, profile(Role::Teacher)).await;
    }
    assert_eq!(registry.active_heartbeats(), 1);

    let writes_before = env.store.write_count();
    time::sleep(Duration::from_secs(95)).await;
    // One timer at 30 s: ticks at 30, 60 and 90.
    assert_eq!(env.store.write_count() - writes_before, 3);
}

#[tokio::test(start_paused = true)]
async fn test_double_teardown_is_a_single_offline_write() {
    let env = TestEnv::new();
    let registry = env.registry();
    let tab = TabId::new();
    let user = UserId::new();

    let tracker = registry.initialize(tab, user, profile(Role::Student)).await;
    let writes_before = env.store.write_count();

    tracker.teardown(TeardownReason::Logout).await;
    tracker.teardown(TeardownReason::Logout).await;
    registry.teardown(tab, TeardownReason::Unload).await;
    registry.teardown(tab, TeardownReason::Unload).await;

    assert_eq!(env.store.write_count() - writes_before, 1);
    assert_eq!(registry.active_heartbeats(), 0);
    assert_eq!(env.reader().status_of(user).await, PresenceStatus::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_tab_and_network_blip_never_flip_status() {
    let env = TestEnv::new();
    let registry = env.registry();
    let reader = env.reader();
    let user = UserId::new();

    let tracker = registry.initialize(TabId::new(), user, profile(Role::Student)).await;
    tracker.handle_lifecycle(LifecycleEvent::TabVisibility(false)).await;
    tracker.handle_lifecycle(LifecycleEvent::Network(false)).await;
    tracker.handle_lifecycle(LifecycleEvent::Network(true)).await;

    for _ in 0..6 {
        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(reader.status_of(user).await, PresenceStatus::Online);
    }
    assert!(!tracker.metadata().await.tab_visible);
}

#[tokio::test(start_paused = true)]
async fn test_projection_flag_follows_effective_presence() {
    let env = TestEnv::new();
    let registry = env.registry();
    let projection = Arc::new(env.projection());
    let user = UserId::new();

    registry.initialize(TabId::new(), user, profile(Role::Student)).await;
    projection.run_once().await.unwrap();
    let flag: UserFlag = env
        .inner
        .get(&keys::user_flag(user))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert!(flag.is_online);

    env.store.fail_writes(true);
    time::sleep(Duration::from_secs(120)).await;
    projection.run_once().await.unwrap();

    let flag: UserFlag = env
        .inner
        .get(&keys::user_flag(user))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert!(!flag.is_online);
    // Last heartbeat that reached the store was the initial write.
    assert_eq!(flag.offline_at, Some(at(60)));
}
