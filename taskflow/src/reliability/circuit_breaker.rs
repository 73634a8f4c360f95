//! Per-resource circuit breaker.
//!
//! State machine:
//! - `Closed`: calls run; failures are counted and the breaker opens once
//!   `failure_threshold` consecutive failures are reached.
//! - `Open`: calls fail fast with [`CircuitOpenError`] until `open_duration_ms`
//!   has elapsed since the breaker opened, then the breaker moves to `HalfOpen`.
//! - `HalfOpen`: at most `half_open_trial_count` probes run concurrently. A
//!   probe success closes the breaker, a probe failure reopens it. Calls
//!   admitted before the breaker went half-open only update the counters.
//!
//! Each breaker owns its own lock, which is never held across an `.await`.

use super::retry::AttemptError;
use crate::errors::{CircuitOpenError, ErrorCategory, InvokeError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub open_duration_ms: u64,
    /// Concurrent probes admitted while half-open.
    pub half_open_trial_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 60_000,
            half_open_trial_count: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold (minimum 1).
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the open duration.
    #[must_use]
    pub fn with_open_duration_ms(mut self, duration: u64) -> Self {
        self.open_duration_ms = duration;
        self
    }

    /// Sets the half-open probe count (minimum 1).
    #[must_use]
    pub fn with_half_open_trial_count(mut self, count: u32) -> Self {
        self.half_open_trial_count = count.max(1);
        self
    }

    fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls are rejected.
    Open,
    /// Limited probes are admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Previous state.
    pub from: CircuitState,
    /// New state.
    pub to: CircuitState,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// The resource identity.
    pub resource: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted in the current window.
    pub failure_count: u32,
    /// Calls admitted.
    pub total_calls: u64,
    /// Admitted calls that succeeded.
    pub total_successes: u64,
    /// Admitted calls that failed.
    pub total_failures: u64,
    /// Calls rejected without running.
    pub total_rejections: u64,
    /// `total_successes / total_calls`, or 0 when nothing ran.
    pub success_rate: f64,
    /// Time of the most recent counted failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Every state change since creation or the last reset.
    pub state_changes: Vec<StateChange>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probes_in_flight: u32,
    /// Bumped on every state change; ties a probe to its half-open window.
    generation: u64,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    state_changes: Vec<StateChange>,
}

/// How a settled call is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    Success,
    Failure,
    Neutral,
}

/// A circuit breaker guarding one external resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    resource: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(resource: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            resource: resource.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    /// The resource identity.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// The current state. An expired `Open` is still reported as `Open` until
    /// the next call arrives.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Runs `operation` under the breaker.
    ///
    /// Rejected calls never invoke `operation`. Failures with category
    /// `Cancelled` are neither counted as success nor failure. The original
    /// error is returned untouched so callers keep its full context.
    ///
    /// # Errors
    ///
    /// [`AttemptError::CircuitOpen`] on rejection, otherwise the operation's
    /// own error as [`AttemptError::Invoke`].
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, AttemptError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let mut permit = self.acquire()?;

        match operation().await {
            Ok(value) => {
                permit.settle(CallOutcome::Success);
                Ok(value)
            }
            Err(err) => {
                let outcome = if err.category == ErrorCategory::Cancelled {
                    CallOutcome::Neutral
                } else {
                    CallOutcome::Failure
                };
                permit.settle(outcome);
                Err(AttemptError::Invoke(err))
            }
        }
    }

    /// Returns the breaker to `Closed` and clears counters and history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation + 1;
        *inner = BreakerState {
            generation,
            ..BreakerState::default()
        };
        info!(resource = %self.resource, "Circuit breaker manually reset");
    }

    /// Snapshot of the breaker's counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let success_rate = if inner.total_calls > 0 {
            inner.total_successes as f64 / inner.total_calls as f64
        } else {
            0.0
        };

        CircuitBreakerMetrics {
            resource: self.resource.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            success_rate,
            last_failure_at: inner.last_failure_at,
            state_changes: inner.state_changes.clone(),
        }
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
            let open_for = self.config.open_duration();
            if elapsed < open_for {
                inner.total_rejections += 1;
                let remaining = open_for.saturating_sub(elapsed);
                debug!(resource = %self.resource, "Circuit open, rejecting call");
                return Err(CircuitOpenError {
                    resource: self.resource.clone(),
                    retry_after_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        let probe = inner.state == CircuitState::HalfOpen;
        if probe {
            if inner.probes_in_flight >= self.config.half_open_trial_count {
                inner.total_rejections += 1;
                return Err(CircuitOpenError {
                    resource: self.resource.clone(),
                    retry_after_ms: 0,
                });
            }
            inner.probes_in_flight += 1;
        }

        inner.total_calls += 1;
        Ok(Permit {
            breaker: self,
            probe,
            generation: inner.generation,
            settled: false,
        })
    }

    fn settle(&self, probe: bool, generation: u64, outcome: CallOutcome) {
        let mut inner = self.inner.lock();
        // Only a probe of the current half-open window may decide it.
        let deciding = probe
            && generation == inner.generation
            && inner.state == CircuitState::HalfOpen;
        if deciding {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match outcome {
            CallOutcome::Success => {
                inner.total_successes += 1;
                match inner.state {
                    CircuitState::HalfOpen if deciding => {
                        inner.failure_count = 0;
                        self.transition(&mut inner, CircuitState::Closed);
                    }
                    CircuitState::Closed => inner.failure_count = 0,
                    CircuitState::HalfOpen | CircuitState::Open => {}
                }
            }
            CallOutcome::Failure => {
                inner.total_failures += 1;
                inner.last_failure_at = Some(Utc::now());
                match inner.state {
                    CircuitState::HalfOpen if deciding => {
                        self.transition(&mut inner, CircuitState::Open);
                    }
                    CircuitState::HalfOpen | CircuitState::Open => {}
                    CircuitState::Closed => {
                        inner.failure_count += 1;
                        if inner.failure_count >= self.config.failure_threshold {
                            self.transition(&mut inner, CircuitState::Open);
                        }
                    }
                }
            }
            CallOutcome::Neutral => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;
        inner.state_changes.push(StateChange {
            from,
            to,
            at: Utc::now(),
        });

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.probes_in_flight = 0;
                warn!(
                    resource = %self.resource,
                    from = %from,
                    to = %to,
                    failure_count = inner.failure_count,
                    open_duration_ms = self.config.open_duration_ms,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.probes_in_flight = 0;
                info!(resource = %self.resource, from = %from, to = %to, "Circuit breaker half-open");
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.probes_in_flight = 0;
                info!(resource = %self.resource, from = %from, to = %to, "Circuit breaker closed");
            }
        }
    }
}

/// An admitted call. Dropping it unsettled (e.g. the caller's future was
/// dropped) releases a probe slot without counting an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, outcome: CallOutcome) {
        self.settled = true;
        self.breaker.settle(self.probe, self.generation, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.probe, self.generation, CallOutcome::Neutral);
        }
    }
}
