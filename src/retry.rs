//! Bounded retry with fixed backoff.
//!
//! A [`RetryPolicy`] is a maximum attempt count plus a fixed sleep between
//! attempts (no jitter, no growth). Whether a failure is worth retrying is
//! decided by the error itself through the [`Retryable`] trait, so the same
//! policy can drive any outbound call.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Determines if an error is transient.
pub trait Retryable {
    /// Returns true if the operation should be attempted again.
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether another attempt should follow a failure on attempt `attempt`
    /// (1-based).
    pub fn should_retry<E: Retryable>(&self, attempt: u32, error: &E) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Failed { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Convert to a Result, discarding retry information.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failed { last_error, .. } => Err(last_error),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent. Sleeps `policy.backoff` between attempts.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(error) => {
                if !policy.should_retry(attempt, &error) {
                    return RetryOutcome::Failed {
                        last_error: error,
                        attempts: attempt,
                    };
                }
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_secs = policy.backoff.as_secs_f64(),
                    error = %error,
                    "transient failure, retrying"
                );
                sleep(policy.backoff).await;
            }
        }
    }
}
