use crate::service::db::core::classifier::{is_retryable, SqlState};
use crate::tool::error::DbError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Upper bound for any single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Jitter is drawn from `[0, MAX_JITTER)` and scales the exponential delay.
pub const MAX_JITTER: f64 = 0.25;

/// Bounded exponential backoff for transient database failures.
///
/// Attempt `n` (1-based) that fails transiently sleeps
/// `min(base_delay * 2^(n-1) * (1 + jitter), max_delay)` before attempt `n + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Result<Self, DbError> {
        if max_attempts == 0 {
            return Err(DbError::InvalidRetryPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay: MAX_BACKOFF,
        })
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay after failed attempt `attempt`, truncated to whole milliseconds.
    pub fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let jitter = jitter.clamp(0.0, MAX_JITTER);
        let millis = self.base_delay.as_millis() as f64 * 2f64.powi(exponent) * (1.0 + jitter);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.floor() as u64)
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// Only the error of the last attempt reaches the caller.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: SqlState + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !is_retryable(&err) || attempt >= max_attempts {
                        return Err(err);
                    }

                    // 지터 추가
                    let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER);
                    let delay = self.backoff_delay(attempt, jitter);
                    warn!(
                        "Transient failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt, max_attempts, delay, err
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
