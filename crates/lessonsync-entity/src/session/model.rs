//! Live session document (`liveSessions/{sessionId}`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lessonsync_core::error::AppError;
use lessonsync_core::result::AppResult;
use lessonsync_core::types::{ClassId, LessonId, LiveSessionId, UserId};

use super::SessionStatus;
use super::roster::ConnectedStudentEntry;

/// A teacher-led lesson instance shared by every participant.
///
/// The teacher owns `status`, `currentSlideIndex` and `version`; each
/// student owns its own element of `connectedStudents`. Methods here only
/// mutate the in-memory value; persistence and conflict handling live in
/// the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    /// Session id.
    pub session_id: LiveSessionId,
    /// Lesson being presented.
    pub lesson_id: LessonId,
    /// Teacher running the session; sole writer of the slide pointer.
    pub teacher_id: UserId,
    /// Class attending.
    pub class_id: ClassId,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Slide currently shown, in `[0, totalSlides)`.
    pub current_slide_index: u32,
    /// Slide count captured from the content catalog at creation.
    pub total_slides: u32,
    /// Counts teacher-owned writes (start, end, slide changes).
    #[serde(default)]
    pub version: u64,
    /// When the teacher started the session.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the teacher ended the session.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Students currently joined.
    #[serde(default)]
    pub connected_students: Vec<ConnectedStudentEntry>,
}

impl LiveSession {
    /// A freshly scheduled session on slide 0.
    pub fn scheduled(
        lesson_id: LessonId,
        teacher_id: UserId,
        class_id: ClassId,
        total_slides: u32,
    ) -> Self {
        Self {
            session_id: LiveSessionId::new(),
            lesson_id,
            teacher_id,
            class_id,
            status: SessionStatus::Scheduled,
            current_slide_index: 0,
            total_slides,
            version: 0,
            start_time: None,
            end_time: None,
            connected_students: Vec::new(),
        }
    }

    /// Move to `next`, rejecting backward or repeated transitions.
    pub fn transition(&mut self, next: SessionStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::session(format!(
                "Session {} cannot move from {} to {}",
                self.session_id, self.status, next
            )));
        }
        match next {
            SessionStatus::Active => self.start_time = Some(now),
            SessionStatus::Ended => self.end_time = Some(now),
            SessionStatus::Scheduled => {}
        }
        self.status = next;
        self.version += 1;
        Ok(())
    }

    /// Point the session at `index`.
    pub fn set_slide(&mut self, index: u32) -> AppResult<()> {
        if !self.status.is_live() {
            return Err(AppError::session(format!(
                "Session {} is {}; slide changes are not accepted",
                self.session_id, self.status
            )));
        }
        self.validate_slide(index)?;
        self.current_slide_index = index;
        self.version += 1;
        Ok(())
    }

    /// Check `index` against the slide count.
    pub fn validate_slide(&self, index: u32) -> AppResult<()> {
        if index >= self.total_slides {
            return Err(AppError::validation(format!(
                "Slide index {index} is out of range for a {}-slide lesson",
                self.total_slides
            )));
        }
        Ok(())
    }

    /// Find a student's roster entry.
    pub fn student(&self, student_id: UserId) -> Option<&ConnectedStudentEntry> {
        self.connected_students.iter().find(|s| s.id == student_id)
    }

    /// Insert or replace the caller's own entry, keeping the original join time.
    pub fn upsert_student(&mut self, entry: ConnectedStudentEntry) {
        match self
            .connected_students
            .iter_mut()
            .find(|s| s.id == entry.id)
        {
            Some(existing) => {
                existing.name = entry.name;
                existing.last_activity = entry.last_activity;
                existing.current_slide_index = entry.current_slide_index;
            }
            None => self.connected_students.push(entry),
        }
    }

    /// Refresh a student's activity. Returns `false` if the student is not joined.
    pub fn touch_student(
        &mut self,
        student_id: UserId,
        slide: Option<u32>,
        now: DateTime<Utc>,
    ) -> bool {
        match self
            .connected_students
            .iter_mut()
            .find(|s| s.id == student_id)
        {
            Some(entry) => {
                entry.last_activity = now;
                if let Some(slide) = slide {
                    entry.current_slide_index = slide;
                }
                true
            }
            None => false,
        }
    }

    /// Remove a student's entry. Returns whether one was removed.
    pub fn remove_student(&mut self, student_id: UserId) -> bool {
        let before = self.connected_students.len();
        self.connected_students.retain(|s| s.id != student_id);
        self.connected_students.len() != before
    }

    /// Students with activity inside the staleness window.
    pub fn active_students(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Vec<ConnectedStudentEntry> {
        self.connected_students
            .iter()
            .filter(|s| s.is_fresh(now, stale_after))
            .cloned()
            .collect()
    }

    /// Drop stale roster entries. Returns the ids removed.
    pub fn prune_stale(&mut self, now: DateTime<Utc>, stale_after: chrono::Duration) -> Vec<UserId> {
        let (fresh, stale): (Vec<_>, Vec<_>) = self
            .connected_students
            .drain(..)
            .partition(|s| s.is_fresh(now, stale_after));
        self.connected_students = fresh;
        stale.into_iter().map(|s| s.id).collect()
    }

    /// Time since the session started, frozen at `endTime` once ended.
    /// Derived on read; never persisted.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let until = self.end_time.unwrap_or(now);
        Some((until - start).max(chrono::Duration::zero()))
    }
}
