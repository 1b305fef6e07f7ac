//! Push subscriptions that degrade to polling when push stalls.

pub mod fallback;
pub mod source;

pub use fallback::{FallbackHandle, FallbackPoller, FallbackStatus};
pub use source::{DocumentSource, PinnedSource, RealtimeSource};
