//! Shared test helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lessonsync_core::config::AppConfig;
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::{Clock, TokioClock};
use lessonsync_core::traits::content::ContentCatalog;
use lessonsync_core::traits::store::DocumentStore;
use lessonsync_core::types::{LessonId, Role};
use lessonsync_entity::presence::PresenceProfile;
use lessonsync_realtime::{FallbackPoller, LiveSessionSync, PresenceReader, PresenceRegistry};
use lessonsync_store::fault::FaultInjectingStore;
use lessonsync_store::memory::MemoryDocumentStore;
use lessonsync_worker::RetryPolicy;
use lessonsync_worker::tasks::{PresenceProjectionTask, RosterPruneTask};

/// Wall-clock time at tokio instant zero in every test.
pub fn origin() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Seconds after [`origin`].
pub fn at(seconds: i64) -> DateTime<Utc> {
    origin() + chrono::Duration::seconds(seconds)
}

/// Lesson catalog where every lesson has the same number of slides.
#[derive(Debug)]
pub struct FixedCatalog(pub u32);

#[async_trait]
impl ContentCatalog for FixedCatalog {
    async fn total_slides(&self, _lesson_id: LessonId) -> AppResult<u32> {
        Ok(self.0)
    }
}

/// Test environment: one shared store seen by every simulated client.
///
/// `store` is the fault-injecting view clients write through; `inner` is
/// the underlying store, for assertions that must bypass injected faults.
/// Create it inside a paused tokio runtime so the clock follows
/// `tokio::time`.
pub struct TestEnv {
    /// Underlying store
    pub inner: Arc<MemoryDocumentStore>,
    /// Client-facing store with switchable faults
    pub store: Arc<FaultInjectingStore>,
    /// Clock tied to the tokio timer
    pub clock: Arc<dyn Clock>,
    /// Default configuration
    pub config: AppConfig,
}

impl TestEnv {
    /// Create a new environment with default configuration
    pub fn new() -> Self {
        let config = AppConfig::default();
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(origin()));
        let inner = Arc::new(MemoryDocumentStore::with_clock(&config.store, clock.clone()));
        let store = Arc::new(FaultInjectingStore::new(inner.clone()));
        Self {
            inner,
            store,
            clock,
            config,
        }
    }

    /// The client-facing store as a trait object
    pub fn shared(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// A presence registry for one client
    pub fn registry(&self) -> PresenceRegistry {
        PresenceRegistry::new(self.shared(), self.clock.clone(), self.config.presence.clone())
            .unwrap()
    }

    /// A presence reader that bypasses injected faults
    pub fn reader(&self) -> PresenceReader {
        PresenceReader::new(self.inner.clone(), self.clock.clone(), self.config.presence.clone())
            .unwrap()
    }

    /// A live session synchronizer for one client
    pub fn session_sync(&self, slides: u32) -> LiveSessionSync {
        LiveSessionSync::new(
            self.shared(),
            Arc::new(FixedCatalog(slides)),
            self.clock.clone(),
            self.config.session.clone(),
            &self.config.presence,
            Arc::new(FallbackPoller::new(self.config.poller.clone()).unwrap()),
        )
    }

    /// The presence projection task, reading and writing the underlying store
    pub fn projection(&self) -> PresenceProjectionTask {
        PresenceProjectionTask::new(
            self.inner.clone(),
            self.clock.clone(),
            &self.config.presence,
            RetryPolicy::from_config(&self.config.worker),
        )
    }

    /// The roster prune task, reading and writing the underlying store
    pub fn roster_prune(&self) -> RosterPruneTask {
        RosterPruneTask::new(self.inner.clone(), self.clock.clone(), &self.config.session)
    }
}

/// Presence profile for a participant
pub fn profile(role: Role) -> PresenceProfile {
    PresenceProfile {
        role,
        email: Some(format!("{}@example.com", role.as_str())),
        user_agent: Some("integration-test".to_string()),
    }
}
