//! Integration tests for the push-to-poll fallback over the document store.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time;

use lessonsync_core::traits::store::DocumentStore;
use lessonsync_realtime::{DocumentSource, FallbackPoller, RealtimeSource};

use helpers::TestEnv;

const PREFIX: &str = "counters/";

fn counter_source(env: &TestEnv) -> Arc<dyn RealtimeSource<Item = Value>> {
    Arc::new(DocumentSource::<Value>::new(env.shared(), PREFIX))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
    let mut values = Vec::new();
    while let Ok(value) = rx.try_recv() {
        values.push(value);
    }
    values
}

#[tokio::test(start_paused = true)]
async fn test_silent_push_channel_falls_back_to_exactly_one_poll_timer() {
    let env = TestEnv::new();
    env.store.stall_watch(true);
    let poller = FallbackPoller::new(env.config.poller.clone()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = poller.wrap_with_fallback(
        "a",
        move |value| {
            let _ = tx.send(value);
        },
        counter_source(&env),
    );

    time::sleep(Duration::from_secs(1)).await;
    env.inner.set("counters/a", json!({ "n": 1 })).await.unwrap();

    time::sleep(Duration::from_millis(3_900)).await;
    assert!(drain(&mut rx).is_empty());
    assert!(!handle.status().polling_started);

    // Grace expires at 5 s; the first poll runs straight away.
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(drain(&mut rx), vec![json!({ "n": 1 })]);

    env.inner.set("counters/a", json!({ "n": 2 })).await.unwrap();
    time::sleep(Duration::from_secs(5)).await;
    assert_eq!(drain(&mut rx), vec![json!({ "n": 2 })]);

    time::sleep(Duration::from_secs(60)).await;
    let status = handle.status();
    assert_eq!(status.poll_timers_started, 1);
    assert_eq!(status.push_deliveries, 0);
    assert_eq!(status.callbacks, 2);
    assert!(status.polls >= 13);

    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_healthy_push_channel_never_polls() {
    let env = TestEnv::new();
    let poller = FallbackPoller::new(env.config.poller.clone()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = poller.wrap_with_fallback(
        "b",
        move |value| {
            let _ = tx.send(value);
        },
        counter_source(&env),
    );

    time::sleep(Duration::from_secs(1)).await;
    env.store.set("counters/b", json!({ "n": 1 })).await.unwrap();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(drain(&mut rx), vec![json!({ "n": 1 })]);

    time::sleep(Duration::from_secs(30)).await;
    let status = handle.status();
    assert!(!status.polling_started);
    assert_eq!(status.polls, 0);
    assert_eq!(status.push_deliveries, 1);

    handle.stop();
    assert_eq!(poller.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rewriting_the_same_value_fires_one_callback() {
    let env = TestEnv::new();
    env.store.set("counters/c", json!({ "n": 7 })).await.unwrap();
    let poller = FallbackPoller::new(env.config.poller.clone()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = poller.wrap_with_fallback(
        "c",
        move |value| {
            let _ = tx.send(value);
        },
        counter_source(&env),
    );

    for _ in 0..3 {
        time::sleep(Duration::from_secs(2)).await;
        env.store.set("counters/c", json!({ "n": 7 })).await.unwrap();
    }
    time::sleep(Duration::from_millis(10)).await;

    assert_eq!(drain(&mut rx), vec![json!({ "n": 7 })]);
    let status = handle.status();
    // Every revision arrived over push; only the first changed anything.
    assert_eq!(status.push_deliveries, 4);
    assert_eq!(status.callbacks, 1);

    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_refused_push_polls_immediately_until_stopped() {
    let env = TestEnv::new();
    env.store.fail_watch(true);
    env.store.set("counters/d", json!({ "n": 1 })).await.unwrap();
    let poller = FallbackPoller::new(env.config.poller.clone()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = poller.wrap_with_fallback(
        "d",
        move |value| {
            let _ = tx.send(value);
        },
        counter_source(&env),
    );

    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(drain(&mut rx), vec![json!({ "n": 1 })]);
    assert!(handle.status().polling_started);

    handle.stop();
    handle.stop();
    let polls = handle.status().polls;
    let reads = env.store.read_count();
    env.store.set("counters/d", json!({ "n": 2 })).await.unwrap();
    time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(handle.status().polls, polls);
    assert_eq!(env.store.read_count(), reads);
    assert!(handle.is_stopped());
}
