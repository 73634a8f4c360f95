//! Retry policy with exponential backoff, additive jitter and cancellable waits.

use crate::cancellation::CancellationToken;
use crate::errors::{CancelledError, CircuitOpenError, ErrorCategory, InvokeError, TaskError};
use crate::utils::sanitize_message;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-task retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Additive jitter as a fraction of the computed delay (0.0 disables).
    pub jitter_ratio: f64,
    /// Categories the policy treats as retryable.
    pub retry_on: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter_ratio: 0.0,
            retry_on: vec![
                ErrorCategory::Timeout,
                ErrorCategory::Transient,
                ErrorCategory::Unavailable,
                ErrorCategory::Unknown,
            ],
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts (at least one attempt is always made).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter ratio, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Replaces the retryable categories.
    #[must_use]
    pub fn with_retry_on(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retry_on = categories.into_iter().collect();
        self
    }

    /// Returns true if the policy retries the category. `Cancelled` never is.
    #[must_use]
    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        category != ErrorCategory::Cancelled && self.retry_on.contains(&category)
    }

    /// Classifies a connector error.
    #[must_use]
    pub fn classify(&self, error: InvokeError) -> TaskError {
        if self.is_retryable(error.category) {
            TaskError::Retryable(error)
        } else {
            TaskError::Fatal(error)
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// `base * multiplier^retry`, plus up to `jitter_ratio` of that, capped at
    /// `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff(&self, retry: u32) -> Duration {
        let max = self.max_delay_ms as f64;
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let raw = (self.base_delay_ms as f64 * self.multiplier.powi(exponent)).min(max);

        let jittered = if self.jitter_ratio > 0.0 && raw > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=raw * self.jitter_ratio);
            (raw + extra).min(max)
        } else {
            raw
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// How a retried operation finally failed.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// Fatal error, or retryable error with no attempts left.
    #[error("{error} (after {attempts} attempt(s))")]
    Task {
        /// The classified error of the last attempt.
        error: TaskError,
        /// Attempts made.
        attempts: u32,
    },

    /// The circuit breaker rejected the call.
    #[error("{0}")]
    CircuitOpen(CircuitOpenError),

    /// Cancellation was observed.
    #[error("{0}")]
    Cancelled(CancelledError),
}

/// Error returned by one attempt of a retried operation.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    /// The operation itself failed.
    #[error("{0}")]
    Invoke(#[from] InvokeError),

    /// The breaker did not let the operation run.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),
}

/// Runs `operation` under `policy`, sleeping between attempts.
///
/// `operation` receives the 1-based attempt number. A breaker rejection ends
/// the loop immediately without consuming budget. Cancellation of `token`
/// interrupts any backoff wait and wins over a concurrent failure.
///
/// # Errors
///
/// Returns [`RetryError`] describing the terminal failure.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempt: u32 = 0;

    loop {
        if token.is_cancelled() {
            return Err(cancelled(token));
        }

        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::CircuitOpen(err)) => return Err(RetryError::CircuitOpen(err)),
            Err(AttemptError::Invoke(err)) => err,
        };

        if token.is_cancelled() || error.category == ErrorCategory::Cancelled {
            return Err(cancelled(token));
        }

        let classified = policy.classify(error);
        if matches!(classified, TaskError::Fatal(_)) || attempt >= policy.max_attempts {
            return Err(RetryError::Task {
                error: classified,
                attempts: attempt,
            });
        }

        let delay = policy.backoff(attempt - 1);
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            category = %classified.invoke_error().category,
            error = %sanitize_message(&classified.invoke_error().message),
            "Attempt failed, retrying"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = token.cancelled() => {
                debug!(attempt, "Backoff interrupted by cancellation");
                return Err(cancelled(token));
            }
        }
    }
}

fn cancelled(token: &CancellationToken) -> RetryError {
    RetryError::Cancelled(CancelledError::new(
        token.reason().unwrap_or_else(|| "cancelled".to_string()),
    ))
}
