//! Push-to-poll fallback.
//!
//! Every wrapped resource gets a push subscription and a grace timer. If
//! the push channel delivers before the grace period runs out, polling is
//! never started. Otherwise a single poll timer takes over. Both paths feed
//! the same de-duplicating delivery, so the callback sees each distinct value
//! at most once no matter which path observed it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use lessonsync_core::config::PollerConfig;
use lessonsync_core::result::AppResult;

use super::source::RealtimeSource;

/// Observable counters for one wrapped resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FallbackStatus {
    /// Values received over the push channel.
    pub push_deliveries: u64,
    /// Whether the poll timer has been started.
    pub polling_started: bool,
    /// Number of poll timers ever started. Never more than one.
    pub poll_timers_started: u32,
    /// Point reads issued by the poll timer.
    pub polls: u64,
    /// Callback invocations.
    pub callbacks: u64,
}

type SharedStatus = Arc<Mutex<FallbackStatus>>;

fn update(status: &SharedStatus, f: impl FnOnce(&mut FallbackStatus)) {
    let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard);
}

fn read(status: &SharedStatus) -> FallbackStatus {
    status.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[derive(Debug)]
struct PollerEntry {
    generation: u64,
    cancel: CancellationToken,
    status: SharedStatus,
}

/// Registry of wrapped resources, keyed by resource id.
#[derive(Debug)]
pub struct FallbackPoller {
    config: PollerConfig,
    entries: Arc<DashMap<String, PollerEntry>>,
    generation: AtomicU64,
}

impl FallbackPoller {
    /// Creates an empty poller. Fails on an invalid poller configuration.
    pub fn new(config: PollerConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            entries: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    /// Subscribe to `resource_id` with push-to-poll fallback.
    ///
    /// Wrapping a resource that is already wrapped stops the previous
    /// subscription first. Must be called from within a tokio runtime.
    pub fn wrap_with_fallback<T, F>(
        &self,
        resource_id: &str,
        callback: F,
        source: Arc<dyn RealtimeSource<Item = T>>,
    ) -> FallbackHandle
    where
        T: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let status = SharedStatus::default();

        let previous = self.entries.insert(
            resource_id.to_string(),
            PollerEntry {
                generation,
                cancel: cancel.clone(),
                status: Arc::clone(&status),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(resource_id, "Replacing existing fallback subscription");
            previous.cancel.cancel();
        }

        let task = FallbackTask {
            resource_id: resource_id.to_string(),
            source,
            callback,
            config: self.config.clone(),
            status: Arc::clone(&status),
            last: None,
        };
        tokio::spawn(task.run(cancel.clone()));

        FallbackHandle {
            resource_id: resource_id.to_string(),
            generation,
            cancel,
            status,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Counters for a wrapped resource, if it is currently wrapped.
    pub fn status(&self, resource_id: &str) -> Option<FallbackStatus> {
        self.entries.get(resource_id).map(|e| read(&e.status))
    }

    /// Number of resources currently wrapped.
    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}

/// Stop handle for one wrapped resource.
#[derive(Debug, Clone)]
pub struct FallbackHandle {
    resource_id: String,
    generation: u64,
    cancel: CancellationToken,
    status: SharedStatus,
    entries: Arc<DashMap<String, PollerEntry>>,
}

impl FallbackHandle {
    /// Stop both the push subscription and the poll timer.
    ///
    /// Idempotent. A handle whose subscription was replaced by a newer
    /// wrap leaves the newer registry entry alone.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.entries
            .remove_if(&self.resource_id, |_, entry| entry.generation == self.generation);
    }

    /// Whether this subscription has been stopped or replaced.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Counters for this subscription, still readable after stop.
    pub fn status(&self) -> FallbackStatus {
        read(&self.status)
    }

    /// The wrapped resource id.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

struct FallbackTask<T, F> {
    resource_id: String,
    source: Arc<dyn RealtimeSource<Item = T>>,
    callback: F,
    config: PollerConfig,
    status: SharedStatus,
    last: Option<T>,
}

impl<T, F> FallbackTask<T, F>
where
    T: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    async fn run(mut self, cancel: CancellationToken) {
        let mut push = match self.source.subscribe(&self.resource_id).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(resource_id = %self.resource_id, "Push subscription failed: {}", e);
                None
            }
        };

        let mut delivered = false;
        let mut poll: Option<Interval> = None;
        if push.is_none() {
            poll = Some(self.start_polling());
        }

        let grace = time::sleep(self.config.grace_period());
        tokio::pin!(grace);
        let mut grace_armed = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = next_push(&mut push) => match item {
                    Some(item) => {
                        delivered = true;
                        update(&self.status, |s| s.push_deliveries += 1);
                        self.deliver(item);
                    }
                    None => {
                        tracing::debug!(resource_id = %self.resource_id, "Push channel closed");
                        push = None;
                        if poll.is_none() {
                            poll = Some(self.start_polling());
                        }
                    }
                },
                _ = &mut grace, if grace_armed => {
                    grace_armed = false;
                    if !delivered && poll.is_none() {
                        tracing::info!(
                            resource_id = %self.resource_id,
                            grace_ms = self.config.grace_period_ms,
                            "No push delivery within grace period, polling"
                        );
                        poll = Some(self.start_polling());
                    }
                }
                _ = next_tick(&mut poll) => {
                    update(&self.status, |s| s.polls += 1);
                    match self.source.fetch(&self.resource_id).await {
                        Ok(Some(item)) => self.deliver(item),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                resource_id = %self.resource_id,
                                "Poll read failed, keeping last value: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(resource_id = %self.resource_id, "Fallback subscription stopped");
    }

    fn start_polling(&self) -> Interval {
        update(&self.status, |s| {
            s.polling_started = true;
            s.poll_timers_started += 1;
        });
        let mut interval = time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn deliver(&mut self, item: T) {
        if self.last.as_ref() == Some(&item) {
            return;
        }
        self.last = Some(item.clone());
        update(&self.status, |s| s.callbacks += 1);
        (self.callback)(item);
    }
}

async fn next_push<T>(push: &mut Option<BoxStream<'static, T>>) -> Option<T> {
    match push {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
