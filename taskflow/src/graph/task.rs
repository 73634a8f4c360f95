//! Task specification.

use crate::capability::CapabilityHandle;
use crate::reliability::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// An immutable task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique id within the graph.
    pub id: String,
    /// Ids of tasks that must succeed first.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// What to invoke.
    pub capability: CapabilityHandle,
    /// Overrides the scheduler's default retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Bound on a single attempt, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskSpec {
    /// Creates a task with no dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, capability: CapabilityHandle) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            capability,
            retry_policy: None,
            timeout_ms: None,
        }
    }

    /// Adds one dependency.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// The resource identity used to select a circuit breaker.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.capability.resource_id
    }

    /// The per-attempt timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
