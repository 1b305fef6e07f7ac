//! Exponential backoff for store writes made by the worker.

use std::future::Future;
use std::time::Duration;

use lessonsync_core::config::WorkerConfig;
use lessonsync_core::result::AppResult;

/// Upper bound on a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry schedule: `attempts` tries, doubling the delay after each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made.
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Build the policy from worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_backoff())
    }

    /// Total attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient errors (see [`lessonsync_core::AppError::is_transient`])
    /// are retried.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient failure: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
