// Retry-with-backoff shared by chunk and playlist fetches.
//
// Exponential backoff with jitter and a max delay cap.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Error;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Checked shift so attempts >= 32 saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter never pushes the final delay past `max_delay`.
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Outcome of a single attempt.
pub enum RetryAction<T> {
    Success(T),
    /// Retryable failure (network, 5xx, 408, 429).
    Retry(Error),
    /// Permanent failure (other 4xx, parse error).
    Fail(Error),
}

impl<T> RetryAction<T> {
    /// Classify a result by [`Error::is_transient`].
    pub fn from_result(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) if err.is_transient() => Self::Retry(err),
            Err(err) => Self::Fail(err),
        }
    }
}

/// Failure after the retry loop gave up.
#[derive(Debug)]
pub struct RetryFailure {
    /// Attempts made, including the first.
    pub attempts: u32,
    pub error: Error,
}

/// Execute an async operation with retry-and-backoff.
///
/// `operation` receives the attempt number (0-indexed). A cancelled token
/// interrupts both the attempt in progress and the backoff sleep.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, RetryFailure>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RetryFailure {
                attempts: attempt,
                error: Error::Cancelled,
            });
        }

        let action = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(RetryFailure {
                    attempts: attempt,
                    error: Error::Cancelled,
                });
            }
            action = operation(attempt) => action,
        };

        match action {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(error) => {
                return Err(RetryFailure {
                    attempts: attempt + 1,
                    error,
                });
            }
            RetryAction::Retry(error) => {
                if attempt >= policy.max_retries {
                    return Err(RetryFailure {
                        attempts: attempt + 1,
                        error,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(RetryFailure {
                            attempts: attempt + 1,
                            error: Error::Cancelled,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
