//! # lessonsync-entity
//!
//! Persisted data model for LessonSync. Every struct in this crate is the
//! JSON body of a document in the shared store and serializes with the
//! camelCase field names other clients expect.

pub mod presence;
pub mod session;

pub use presence::{PresenceMetadata, PresenceProfile, PresenceRecord, PresenceStatus, UserFlag};
pub use session::{ConnectedStudentEntry, LiveSession, SessionStatus};
