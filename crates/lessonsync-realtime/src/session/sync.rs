//! Live session synchronizer.
//!
//! The session document is shared by the teacher (status, slide pointer,
//! version) and every student (their own roster entry). Nobody holds a lock:
//! each write is a read-modify-write retried on a lost compare-and-set, so
//! concurrent writers never erase each other's fields.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use lessonsync_core::config::{LiveSessionConfig, PresenceConfig};
use lessonsync_core::error::{AppError, ErrorKind};
use lessonsync_core::result::AppResult;
use lessonsync_core::traits::clock::Clock;
use lessonsync_core::traits::content::ContentCatalog;
use lessonsync_core::traits::store::{DocumentStore, encode};
use lessonsync_core::types::{ClassId, LessonId, LiveSessionId, UserId};
use lessonsync_entity::session::{ConnectedStudentEntry, LiveSession, SessionStatus};
use lessonsync_store::keys;

use crate::poller::fallback::{FallbackHandle, FallbackPoller, FallbackStatus};
use crate::poller::source::{DocumentSource, PinnedSource};

use super::view::SessionView;

/// Distinguishes observers of the same session inside a shared poller.
static NEXT_OBSERVER: AtomicU64 = AtomicU64::new(1);

/// Reads and writes live sessions.
#[derive(Debug, Clone)]
pub struct LiveSessionSync {
    store: Arc<dyn DocumentStore>,
    content: Arc<dyn ContentCatalog>,
    clock: Arc<dyn Clock>,
    config: LiveSessionConfig,
    /// Cadence of roster activity refreshes for participating students.
    activity_interval: Duration,
    poller: Arc<FallbackPoller>,
}

impl LiveSessionSync {
    /// Create a synchronizer.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        content: Arc<dyn ContentCatalog>,
        clock: Arc<dyn Clock>,
        config: LiveSessionConfig,
        presence: &PresenceConfig,
        poller: Arc<FallbackPoller>,
    ) -> Self {
        Self {
            store,
            content,
            clock,
            config,
            activity_interval: presence.heartbeat_interval(),
            poller,
        }
    }

    // ── Lifecycle (teacher) ────────────────────────────────────

    /// Schedule a new session for a lesson.
    pub async fn create_session(
        &self,
        lesson_id: LessonId,
        teacher_id: UserId,
        class_id: ClassId,
    ) -> AppResult<LiveSession> {
        let total_slides = self.content.total_slides(lesson_id).await?;
        if total_slides == 0 {
            return Err(AppError::validation(format!(
                "Lesson {lesson_id} has no slides"
            )));
        }

        let session = LiveSession::scheduled(lesson_id, teacher_id, class_id, total_slides);
        let key = keys::live_session(session.session_id);
        if !self.store.compare_and_set(&key, encode(&session)?, None).await? {
            return Err(AppError::conflict(format!(
                "Session {} already exists",
                session.session_id
            )));
        }

        tracing::info!(
            session_id = %session.session_id,
            %lesson_id,
            %teacher_id,
            total_slides,
            "Live session scheduled"
        );
        Ok(session)
    }

    /// Read a session. `None` if it does not exist.
    pub async fn get_session(&self, session_id: LiveSessionId) -> AppResult<Option<LiveSession>> {
        self.store
            .get(&keys::live_session(session_id))
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    /// Scheduled → active.
    pub async fn start_session(
        &self,
        session_id: LiveSessionId,
        teacher_id: UserId,
    ) -> AppResult<LiveSession> {
        let session = self
            .modify(session_id, |session| {
                ensure_teacher(session, teacher_id)?;
                session.transition(SessionStatus::Active, self.clock.now())?;
                Ok(true)
            })
            .await?;
        tracing::info!(%session_id, %teacher_id, "Live session started");
        Ok(session)
    }

    /// Scheduled or active → ended. Ended is terminal.
    pub async fn end_session(
        &self,
        session_id: LiveSessionId,
        teacher_id: UserId,
    ) -> AppResult<LiveSession> {
        let session = self
            .modify(session_id, |session| {
                ensure_teacher(session, teacher_id)?;
                session.transition(SessionStatus::Ended, self.clock.now())?;
                Ok(true)
            })
            .await?;
        tracing::info!(
            %session_id,
            %teacher_id,
            students = session.connected_students.len(),
            "Live session ended"
        );
        Ok(session)
    }

    /// Move the slide pointer. Last write wins among the teacher's tabs.
    ///
    /// Rejected unless the session is active, so a change racing an end is
    /// never applied on top of the ended document.
    pub async fn update_slide(
        &self,
        session_id: LiveSessionId,
        teacher_id: UserId,
        index: u32,
    ) -> AppResult<LiveSession> {
        let session = self
            .modify(session_id, |session| {
                ensure_teacher(session, teacher_id)?;
                session.set_slide(index)?;
                Ok(true)
            })
            .await?;
        tracing::debug!(%session_id, index, version = session.version, "Slide updated");
        Ok(session)
    }

    /// Move the slide pointer only if the session is still at `expected_version`.
    ///
    /// A tab that last saw an older version gets a `Conflict` instead of
    /// overwriting a newer change.
    pub async fn update_slide_versioned(
        &self,
        session_id: LiveSessionId,
        teacher_id: UserId,
        index: u32,
        expected_version: u64,
    ) -> AppResult<LiveSession> {
        self.modify(session_id, |session| {
            ensure_teacher(session, teacher_id)?;
            if session.version != expected_version {
                return Err(AppError::conflict(format!(
                    "Session {session_id} is at version {}, not {expected_version}",
                    session.version
                )));
            }
            session.set_slide(index)?;
            Ok(true)
        })
        .await
    }

    // ── Roster (student) ───────────────────────────────────────

    /// Add the student to the roster, or refresh their entry if present.
    pub async fn join(
        &self,
        session_id: LiveSessionId,
        student_id: UserId,
        name: &str,
    ) -> AppResult<LiveSession> {
        let session = self
            .modify(session_id, |session| {
                if session.status == SessionStatus::Ended {
                    return Err(AppError::session(format!(
                        "Session {session_id} has ended"
                    )));
                }
                let entry = ConnectedStudentEntry::joined(
                    student_id,
                    name,
                    session.current_slide_index,
                    self.clock.now(),
                );
                session.upsert_student(entry);
                Ok(true)
            })
            .await?;
        tracing::info!(%session_id, %student_id, "Student joined live session");
        Ok(session)
    }

    /// Refresh the student's `lastActivity`, optionally recording their slide.
    ///
    /// A no-op on an ended session. Fails with `NotFound` if the student has
    /// not joined.
    pub async fn record_activity(
        &self,
        session_id: LiveSessionId,
        student_id: UserId,
        slide: Option<u32>,
    ) -> AppResult<LiveSession> {
        self.modify(session_id, |session| {
            if session.status == SessionStatus::Ended {
                return Ok(false);
            }
            if let Some(index) = slide {
                session.validate_slide(index)?;
            }
            if !session.touch_student(student_id, slide, self.clock.now()) {
                return Err(AppError::not_found(format!(
                    "Student {student_id} has not joined session {session_id}"
                )));
            }
            Ok(true)
        })
        .await
    }

    /// Remove the student's roster entry. Leaving twice, or leaving a
    /// session that no longer exists, is fine. An ended session keeps its
    /// roster as the record of who attended.
    pub async fn leave(&self, session_id: LiveSessionId, student_id: UserId) -> AppResult<()> {
        let result = self
            .modify(session_id, |session| {
                if session.status == SessionStatus::Ended {
                    return Ok(false);
                }
                Ok(session.remove_student(student_id))
            })
            .await;
        match result {
            Ok(_) => {
                tracing::info!(%session_id, %student_id, "Student left live session");
                Ok(())
            }
            Err(e) if e.kind == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Join and keep the roster entry fresh until the returned handle is stopped.
    pub async fn participate(
        &self,
        session_id: LiveSessionId,
        student_id: UserId,
        name: &str,
    ) -> AppResult<Participation> {
        self.join(session_id, student_id, name).await?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_activity(
            self.clone(),
            session_id,
            student_id,
            cancel.clone(),
        ));

        Ok(Participation {
            sync: self.clone(),
            session_id,
            student_id,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    // ── Observation ────────────────────────────────────────────

    /// Follow a session through the push-to-poll fallback.
    ///
    /// The callback receives a fresh [`SessionView`] whenever the document
    /// changes and on every elapsed tick while the view differs from the
    /// last one delivered. Each call gets its own subscription, so several
    /// observers of one session run side by side.
    pub fn observe<F>(&self, session_id: LiveSessionId, callback: F) -> SessionObserver
    where
        F: Fn(SessionView) + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel::<Option<LiveSession>>(None);
        let source = Arc::new(PinnedSource::new(
            DocumentSource::<LiveSession>::new(Arc::clone(&self.store), keys::LIVE_SESSIONS_PREFIX),
            session_id.to_string(),
        ));
        let observer = NEXT_OBSERVER.fetch_add(1, Ordering::Relaxed);
        let fallback = self.poller.wrap_with_fallback(
            &format!("{session_id}#{observer}"),
            move |session: LiveSession| {
                tx.send_replace(Some(session));
            },
            source,
        );

        let cancel = CancellationToken::new();
        tokio::spawn(run_view(
            rx,
            Arc::clone(&self.clock),
            self.config.roster_stale(),
            self.config.elapsed_tick(),
            cancel.clone(),
            callback,
        ));

        SessionObserver { fallback, cancel }
    }

    /// Optimistic read-modify-write of one session document.
    ///
    /// `apply` returns whether anything changed; `false` skips the write.
    async fn modify<F>(&self, session_id: LiveSessionId, mut apply: F) -> AppResult<LiveSession>
    where
        F: FnMut(&mut LiveSession) -> AppResult<bool>,
    {
        let key = keys::live_session(session_id);
        let attempts = self.config.max_write_retries.max(1);

        for attempt in 1..=attempts {
            let document = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Session {session_id} not found")))?;
            let mut session: LiveSession = document.decode()?;

            if !apply(&mut session)? {
                return Ok(session);
            }
            if self
                .store
                .compare_and_set(&key, encode(&session)?, Some(document.revision))
                .await?
            {
                return Ok(session);
            }
            tracing::debug!(%session_id, attempt, "Session write lost a race, retrying");
        }

        Err(AppError::conflict(format!(
            "Session {session_id} write did not land after {attempts} attempts"
        )))
    }
}

fn ensure_teacher(session: &LiveSession, teacher_id: UserId) -> AppResult<()> {
    if session.teacher_id != teacher_id {
        return Err(AppError::authorization(format!(
            "User {teacher_id} does not teach session {}",
            session.session_id
        )));
    }
    Ok(())
}

/// A student's attachment to a live session.
#[derive(Debug)]
pub struct Participation {
    sync: LiveSessionSync,
    session_id: LiveSessionId,
    student_id: UserId,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Participation {
    /// The session joined.
    pub fn session_id(&self) -> LiveSessionId {
        self.session_id
    }

    /// Report the slide the student is looking at.
    pub async fn report_slide(&self, index: u32) -> AppResult<()> {
        self.sync
            .record_activity(self.session_id, self.student_id, Some(index))
            .await
            .map(|_| ())
    }

    /// Stop refreshing and leave the roster. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::warn!(session_id = %self.session_id, "Activity task ended abnormally: {}", e);
        }
        if let Err(e) = self.sync.leave(self.session_id, self.student_id).await {
            tracing::warn!(
                session_id = %self.session_id,
                student_id = %self.student_id,
                "Leave failed, roster staleness will hide the entry: {}",
                e
            );
        }
    }
}

async fn run_activity(
    sync: LiveSessionSync,
    session_id: LiveSessionId,
    student_id: UserId,
    cancel: CancellationToken,
) {
    let period = sync.activity_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sync.record_activity(session_id, student_id, None).await {
                    tracing::warn!(%session_id, %student_id, "Roster activity write failed: {}", e);
                }
            }
        }
    }
}

/// Stop handle for [`LiveSessionSync::observe`].
#[derive(Debug, Clone)]
pub struct SessionObserver {
    fallback: FallbackHandle,
    cancel: CancellationToken,
}

impl SessionObserver {
    /// Stop observing. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.fallback.stop();
    }

    /// Whether the observer has stopped, either through
    /// [`SessionObserver::stop`] or because its subscription was dropped.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.fallback.is_stopped()
    }

    /// Push/poll counters of the underlying subscription.
    pub fn fallback_status(&self) -> FallbackStatus {
        self.fallback.status()
    }
}

async fn run_view<F>(
    mut sessions: watch::Receiver<Option<LiveSession>>,
    clock: Arc<dyn Clock>,
    roster_stale: chrono::Duration,
    tick: Duration,
    cancel: CancellationToken,
    callback: F,
) where
    F: Fn(SessionView) + Send + Sync + 'static,
{
    let mut ticker = time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<SessionView> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = sessions.changed() => {
                if changed.is_err() {
                    tracing::debug!("Session feed closed, observer exiting");
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let Some(session) = sessions.borrow_and_update().clone() else {
            continue;
        };
        let view = SessionView::build(session, clock.now(), roster_stale);
        if last.as_ref() != Some(&view) {
            last = Some(view.clone());
            callback(view);
        }
    }
}
