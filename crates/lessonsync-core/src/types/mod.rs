//! Shared value types used across LessonSync crates.

pub mod id;
pub mod role;

pub use id::{ClassId, LessonId, LiveSessionId, TabId, UserId};
pub use role::Role;
