//! Stop handle shared by every subscription and timer in this crate.

use tokio_util::sync::CancellationToken;

/// Explicit stop handle for a background subscription.
///
/// Dropping the handle does not stop the subscription; call
/// [`SubscriptionHandle::stop`]. Stopping is idempotent and may be
/// triggered from any clone.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    /// Wrap a cancellation token.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Stop the subscription. Safe to call repeatedly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether [`SubscriptionHandle::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that fires when this handle is stopped.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
