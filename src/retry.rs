// Bounded exponential backoff with jitter around a single fallible async operation

use crate::error::{ApiError, ErrorKind, RateLimitExceeded, RetryError};
use rand::Rng;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lets a [`RetryPolicy`] decide whether an error is worth another attempt.
pub trait RetryClass {
    fn kind(&self) -> ErrorKind;

    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl RetryClass for ApiError {
    fn kind(&self) -> ErrorKind {
        ApiError::kind(self)
    }

    fn status_code(&self) -> Option<u16> {
        ApiError::status_code(self)
    }
}

impl RetryClass for RateLimitExceeded {
    fn kind(&self) -> ErrorKind {
        ErrorKind::RateLimited
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    // Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub retryable_errors: HashSet<ErrorKind>,
    pub retryable_statuses: HashSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_errors: [ErrorKind::Network, ErrorKind::Timeout, ErrorKind::RateLimited]
                .into_iter()
                .collect(),
            retryable_statuses: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable<E: RetryClass>(&self, err: &E) -> bool {
        match err.kind() {
            ErrorKind::Cancelled | ErrorKind::Rejected => false,
            kind => {
                self.retryable_errors.contains(&kind)
                    || err
                        .status_code()
                        .map_or(false, |status| self.retryable_statuses.contains(&status))
            }
        }
    }

    /// Backoff before retry number `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Backoff perturbed by up to `jitter_factor` of itself in either direction.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt).as_secs_f64();
        let spread = delay * self.jitter_factor;
        if spread <= 0.0 {
            return Duration::from_secs_f64(delay);
        }

        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay + offset).max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires. Cancellation is observed both while the
    /// operation is in flight and while sleeping between attempts.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClass + Display,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Cancelled {
                return Err(RetryError::Cancelled);
            }
            if !self.policy.is_retryable(&err) {
                debug!(attempt, error = %err, "non-retryable failure");
                return Err(RetryError::Fatal(err));
            }
            if attempt >= self.policy.max_retries {
                warn!(attempt, error = %err, "operation failed after max retries");
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    source: err,
                });
            }

            let delay = self.policy.calculate_delay(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
