//! Bounded retry with fixed-delay backoff.
//!
//! Used identically by feed fetching, article scraping, and the AI collaborators. The caller
//! supplies a classifier that decides whether a failure is worth another attempt; fatal failures
//! abort immediately without consuming the remaining attempts. The backoff sleep races a
//! cancellation token so a shutdown never waits out a delay.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Classification returned by the caller for each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure; try again if attempts remain.
    Retryable,
    /// Permanent failure; stop now.
    Fatal,
}

/// Terminal outcome of a retried operation that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt failed with a retryable error; the last one is preserved.
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Attempts consumed, equal to the policy's `max_attempts`.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: E,
    },
    /// The classifier marked the failure fatal.
    #[error("operation aborted on attempt {attempt}: {source}")]
    Aborted {
        /// Attempt on which the fatal error surfaced.
        attempt: u32,
        /// The fatal error.
        #[source]
        source: E,
    },
    /// Cancellation arrived while waiting to retry.
    #[error("operation cancelled during backoff after {attempts} attempts: {source}")]
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
        /// Error that triggered the interrupted backoff.
        #[source]
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Borrow the underlying error regardless of how the retry ended.
    pub fn inner(&self) -> &E {
        match self {
            Self::Exhausted { source, .. }
            | Self::Aborted { source, .. }
            | Self::Cancelled { source, .. } => source,
        }
    }

    /// Consume the wrapper and return the underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. }
            | Self::Aborted { source, .. }
            | Self::Cancelled { source, .. } => source,
        }
    }
}

/// Attempt budget and fixed backoff applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay slept between a retryable failure and the next attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Build a policy with an explicit budget and delay.
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A policy that never retries.
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, the classifier declares a failure fatal, the attempt budget is
    /// spent, or `cancel` fires during a backoff sleep.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        mut op: F,
        classify: C,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if classify(&error) == RetryDecision::Fatal {
                return Err(RetryError::Aborted {
                    attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            tracing::debug!(
                attempt,
                max_attempts,
                delay_ms = self.delay.as_millis() as u64,
                error = %error,
                "Retryable failure; backing off"
            );

            if !self.backoff(cancel).await {
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    source: error,
                });
            }
        }
    }

    /// Sleep for the policy delay. Returns `false` if `cancel` fired first.
    pub async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}
