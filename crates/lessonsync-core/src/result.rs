//! Convenience result type alias for LessonSync.

use crate::error::AppError;

/// A specialized `Result` type for LessonSync operations.
pub type AppResult<T> = Result<T, AppError>;
