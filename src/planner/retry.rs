//! Bounded exponential backoff for transient cloud errors.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApplyConfig;
use crate::error::CloudError;

/// Retry policy for a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&ApplyConfig> for RetryPolicy {
    fn from(config: &ApplyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and simulation.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    ///
    /// A server-provided delay wins over the computed backoff but is still
    /// capped by `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &CloudError) -> Duration {
        let backoff = error.retry_after().unwrap_or_else(|| {
            let exp = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1 << exp)
        });
        backoff.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// Returns the final result together with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> (Result<T, CloudError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        "{label}: transient error on attempt {attempt}/{}: {e}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!("{label}: giving up after {attempt} attempt(s)");
                    return (Err(e), attempt);
                }
            }
        }
    }
}
