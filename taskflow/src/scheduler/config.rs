//! Scheduler configuration.

use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Scheduler`](super::Scheduler).
///
/// There is no global instance: build one and pass it to the constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks of one run in flight at once.
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,
    /// Retry policy for tasks that do not declare their own.
    #[serde(default)]
    pub default_retry_policy: RetryPolicy,
    /// Settings for lazily created circuit breakers.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-attempt timeout for tasks that do not declare their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_ms: Option<u64>,
}

fn default_max_parallel_tasks() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            default_retry_policy: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            task_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Sets the parallelism bound (at least 1).
    #[must_use]
    pub fn with_max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max.max(1);
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    /// Sets the circuit breaker defaults.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Sets the default per-attempt timeout.
    #[must_use]
    pub fn with_task_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.task_timeout_ms = Some(timeout_ms);
        self
    }

    /// Effective parallelism bound.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.max_parallel_tasks.max(1)
    }

    /// Default per-attempt timeout as a `Duration`.
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}
