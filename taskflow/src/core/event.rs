//! Transition events emitted on every execution record change.

use super::{LastError, RunStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A status value carried by a transition event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "status", rename_all = "snake_case")]
pub enum StatusValue {
    /// A task status.
    Task(TaskStatus),
    /// A run status.
    Run(RunStatus),
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(status) => status.fmt(f),
            Self::Run(status) => status.fmt(f),
        }
    }
}

/// An event describing one accepted transition of an execution record.
///
/// `task_id` is `None` for run-level transitions. A persistence layer can
/// subscribe to these through an [`EventSink`](crate::events::EventSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// The execution the transition belongs to.
    pub execution_id: String,
    /// The task, for task-level transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Status before the transition.
    pub old_status: StatusValue,
    /// Status after the transition.
    pub new_status: StatusValue,
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
    /// Attempt count of the task at the time of the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Sanitized error detail, for failing transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LastError>,
}

impl TransitionEvent {
    /// Creates an event for a task transition.
    #[must_use]
    pub fn task(
        execution_id: impl Into<String>,
        task_id: impl Into<String>,
        old_status: TaskStatus,
        new_status: TaskStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: Some(task_id.into()),
            old_status: StatusValue::Task(old_status),
            new_status: StatusValue::Task(new_status),
            timestamp,
            attempt: None,
            error: None,
        }
    }

    /// Creates an event for a run transition.
    #[must_use]
    pub fn run(
        execution_id: impl Into<String>,
        old_status: RunStatus,
        new_status: RunStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: None,
            old_status: StatusValue::Run(old_status),
            new_status: StatusValue::Run(new_status),
            timestamp,
            attempt: None,
            error: None,
        }
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Sets the error detail.
    #[must_use]
    pub fn with_error(mut self, error: Option<LastError>) -> Self {
        self.error = error;
        self
    }

    /// Returns true for run-level transitions.
    #[must_use]
    pub fn is_run_event(&self) -> bool {
        self.task_id.is_none()
    }

    /// Returns a dotted event name such as `task.failed` or `run.succeeded`.
    #[must_use]
    pub fn event_type(&self) -> String {
        match self.new_status {
            StatusValue::Task(status) => format!("task.{status}"),
            StatusValue::Run(status) => format!("run.{status}"),
        }
    }
}
