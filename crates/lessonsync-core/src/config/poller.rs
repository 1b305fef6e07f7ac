//! Fallback poller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Push-to-poll degradation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// How long to wait for a first push delivery before polling, in milliseconds.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
    /// Interval between point reads once polling has started, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl PollerConfig {
    /// Grace window as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Poll interval as a [`Duration`]. Never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Reject a zero poll interval, which would spin.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::configuration(
                "poller.poll_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_grace_period() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_poll_interval_is_rejected_and_clamped() {
        let config = PollerConfig {
            grace_period_ms: 10,
            poll_interval_ms: 0,
        };
        assert!(config.validate().is_err());
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
