//! Content catalog trait.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::LessonId;

/// Read-only view of the lesson content store.
#[async_trait]
pub trait ContentCatalog: Send + Sync + std::fmt::Debug + 'static {
    /// Number of slides in a lesson. Used to bound `currentSlideIndex`.
    async fn total_slides(&self, lesson_id: LessonId) -> AppResult<u32>;
}
