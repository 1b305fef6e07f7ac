//! Live session synchronizer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Live session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSessionConfig {
    /// Maximum compare-and-set attempts for a roster or slide write.
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
    /// Roster entries older than this (seconds since `lastActivity`) read as gone.
    #[serde(default = "default_roster_stale")]
    pub roster_stale_seconds: u64,
    /// Interval at which observers recompute the elapsed-duration figure, in milliseconds.
    #[serde(default = "default_elapsed_tick")]
    pub elapsed_tick_ms: u64,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            max_write_retries: default_max_write_retries(),
            roster_stale_seconds: default_roster_stale(),
            elapsed_tick_ms: default_elapsed_tick(),
        }
    }
}

impl LiveSessionConfig {
    /// Roster staleness as a [`chrono::Duration`].
    pub fn roster_stale(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.roster_stale_seconds as i64)
    }

    /// Elapsed-figure tick as a [`Duration`].
    pub fn elapsed_tick(&self) -> Duration {
        Duration::from_millis(self.elapsed_tick_ms.max(1))
    }
}

fn default_max_write_retries() -> u32 {
    8
}

fn default_roster_stale() -> u64 {
    60
}

fn default_elapsed_tick() -> u64 {
    1000
}
