//! Presence heartbeat and staleness configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Presence tracking configuration.
///
/// `stale_threshold_seconds` must be at least twice
/// `heartbeat_interval_seconds` so a single missed heartbeat never reads
/// as offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Interval between heartbeat writes in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Maximum heartbeat age in seconds before a user reads as offline.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_seconds: u64,
    /// Interval of the clock-driven staleness re-evaluation in seconds.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            stale_threshold_seconds: default_stale_threshold(),
            reconcile_interval_seconds: default_reconcile_interval(),
        }
    }
}

impl PresenceConfig {
    /// Heartbeat interval as a [`Duration`]. Never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.max(1))
    }

    /// Staleness threshold as a [`chrono::Duration`] for timestamp arithmetic.
    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_threshold_seconds as i64)
    }

    /// Reconciliation tick as a [`Duration`]. Never zero.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds.max(1))
    }

    /// Validate the heartbeat/staleness relationship.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(AppError::configuration(
                "presence.heartbeat_interval_seconds must be greater than zero",
            ));
        }
        if self.reconcile_interval_seconds == 0 {
            return Err(AppError::configuration(
                "presence.reconcile_interval_seconds must be greater than zero",
            ));
        }
        if self.stale_threshold_seconds < self.heartbeat_interval_seconds * 2 {
            return Err(AppError::configuration(format!(
                "presence.stale_threshold_seconds ({}) must be at least twice the heartbeat interval ({})",
                self.stale_threshold_seconds, self.heartbeat_interval_seconds
            )));
        }
        Ok(())
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_threshold() -> u64 {
    60
}

fn default_reconcile_interval() -> u64 {
    10
}
