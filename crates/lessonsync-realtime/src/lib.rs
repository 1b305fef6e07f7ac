//! # lessonsync-realtime
//!
//! Client-side realtime engine for LessonSync. Provides:
//!
//! - Presence tracking: per-tab heartbeat trackers held in a registry
//! - Presence reading: effective online/offline derived from heartbeat age
//! - Push-to-poll fallback for any subscription that stalls
//! - Live session synchronization: slide pointer, lifecycle, and roster

pub mod poller;
pub mod presence;
pub mod session;
pub mod subscription;

pub use poller::fallback::{FallbackHandle, FallbackPoller, FallbackStatus};
pub use poller::source::{DocumentSource, PinnedSource, RealtimeSource};
pub use presence::lifecycle::{LifecycleEvent, TeardownReason};
pub use presence::reader::{PresenceReader, PresenceSnapshot};
pub use presence::registry::PresenceRegistry;
pub use presence::tracker::PresenceTracker;
pub use session::sync::{LiveSessionSync, Participation, SessionObserver};
pub use session::view::SessionView;
pub use subscription::SubscriptionHandle;
