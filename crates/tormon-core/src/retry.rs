//! Bounded retry with linear backoff.
//!
//! Provides the retry driver used for control-port authentication. A policy
//! describes how long to wait after each failed attempt and how many
//! attempts are allowed; [`with_retry_outcome`] runs an async operation under
//! that policy and reports how many attempts it took.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tormon_core::retry::{RetryPolicy, with_retry};
//!
//! let policy = RetryPolicy::tor_auth();
//! let result = with_retry(&policy, || async { client.authenticate(&credential).await }).await;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Configuration for retry behavior.
///
/// The delay grows linearly: after the n-th failed attempt (1-based) the
/// driver waits `step * n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub step: Duration,
    pub max_delay: Duration,
    /// Maximum number of attempts. None = retry forever (use with caution).
    pub max_attempts: Option<u32>,
    /// Also wait after the last failed attempt before giving up.
    pub delay_after_last: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(3),
            delay_after_last: false,
        }
    }
}

impl RetryPolicy {
    /// Policy for control-port authentication: 10 attempts, waiting
    /// 0.2s, 0.4s, ... 2.0s after each failure (11s in the worst case).
    #[must_use]
    pub fn tor_auth() -> Self {
        Self {
            step: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            max_attempts: Some(10),
            delay_after_last: true,
        }
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.step
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }

    /// Sum of every delay a fully failing run would wait.
    #[must_use]
    pub fn worst_case_delay(&self) -> Option<Duration> {
        let max = self.max_attempts?;
        let waited = if self.delay_after_last { max } else { max.saturating_sub(1) };
        Some(
            (1..=waited)
                .map(|attempt| self.delay_after_attempt(attempt))
                .sum(),
        )
    }
}

/// Outcome of a retry operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The result (success or final error).
    pub result: Result<T, E>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent (including delays).
    pub elapsed: Duration,
}

/// Execute an async operation with retry and backoff.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_outcome(policy, operation).await.result
}

/// Execute an async operation with retry, returning detailed outcome.
///
/// Each failed attempt is logged with the attempt number, the delay applied
/// and the error that triggered the retry.
pub async fn with_retry_outcome<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        total_attempts = attempt,
                        retries = attempt - 1,
                        "Operation succeeded after retries"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) => {
                let exhausted = policy.max_attempts.is_some_and(|max| attempt >= max);
                let delay = policy.delay_after_attempt(attempt);

                if exhausted {
                    if policy.delay_after_last {
                        sleep(delay).await;
                    }
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Operation failed after all retry attempts"
                    );
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }

                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after failure"
                );
                sleep(delay).await;
            }
        }
    }
}
