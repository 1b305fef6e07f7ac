//! Client lifecycle signals fed into a tracker.

use serde::{Deserialize, Serialize};

/// Environment change reported by the embedding client.
///
/// These only ever touch presence metadata; they never flip
/// online/offline on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The tab or window became visible (`true`) or hidden (`false`).
    TabVisibility(bool),
    /// The client gained (`true`) or lost (`false`) network connectivity.
    Network(bool),
}

/// Why a tracker is being torn down. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    /// The user signed out.
    Logout,
    /// The hosting page or process is going away.
    Unload,
    /// A different user is taking over the tab.
    UserSwitch,
    /// The whole client is shutting down.
    Shutdown,
}

impl std::fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Logout => "logout",
            Self::Unload => "unload",
            Self::UserSwitch => "user_switch",
            Self::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}
