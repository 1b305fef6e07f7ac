//! User presence tracking and reading.

pub mod lifecycle;
pub mod reader;
pub mod registry;
pub mod tracker;

pub use lifecycle::{LifecycleEvent, TeardownReason};
pub use reader::{PresenceReader, PresenceSnapshot};
pub use registry::PresenceRegistry;
pub use tracker::PresenceTracker;
