//! Error types for the taskflow orchestration core.
//!
//! Only [`ValidationError`] (at submission) and [`InvalidStateTransition`]
//! (an internal invariant violation) ever reach the caller of the scheduling
//! API. Task-level failures are recorded on the execution record instead.

use crate::core::{FailureKind, RunStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for taskflow operations.
#[derive(Debug, Error)]
pub enum TaskflowError {
    /// The submitted graph is invalid.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A state transition violated the lifecycle rules.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidStateTransition),

    /// No execution is registered under the given id.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Diagnostic metadata attached to validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `GRAPH-CYCLE`).
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when a graph fails validation at build time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The dependency edges form a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A task lists a dependency that is not part of the graph.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// The task declaring the dependency.
        task: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// An edge names a task that is not part of the graph.
    #[error("Edge references unknown task '{task}'")]
    UnknownTask {
        /// The missing task id.
        task: String,
    },

    /// A task lists itself as a dependency.
    #[error("Task '{task}' cannot depend on itself")]
    SelfDependency {
        /// The offending task.
        task: String,
    },

    /// Two tasks share the same id.
    #[error("Duplicate task id '{task}'")]
    DuplicateTask {
        /// The duplicated id.
        task: String,
    },

    /// A task id is empty or whitespace-only.
    #[error("Task id cannot be empty or whitespace-only")]
    EmptyTaskId,
}

impl ValidationError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::CycleDetected(_) => "GRAPH-CYCLE",
            Self::UnknownDependency { .. } => "GRAPH-MISSING-DEP",
            Self::UnknownTask { .. } => "GRAPH-UNKNOWN-TASK",
            Self::SelfDependency { .. } => "GRAPH-SELF-DEP",
            Self::DuplicateTask { .. } => "GRAPH-DUPLICATE",
            Self::EmptyTaskId => "GRAPH-EMPTY-ID",
        }
    }

    /// Returns the task ids involved in the error.
    #[must_use]
    pub fn tasks(&self) -> Vec<String> {
        match self {
            Self::CycleDetected(err) => err.cycle_path.clone(),
            Self::UnknownDependency { task, dependency } => vec![task.clone(), dependency.clone()],
            Self::UnknownTask { task }
            | Self::SelfDependency { task }
            | Self::DuplicateTask { task } => vec![task.clone()],
            Self::EmptyTaskId => Vec::new(),
        }
    }

    /// Returns diagnostic info for the error.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::CycleDetected(_) => {
                info.with_fix_hint("Remove one of the dependencies in the cycle to break it.")
            }
            Self::UnknownDependency { .. } => info.with_fix_hint(
                "Ensure all dependencies reference tasks that exist in the graph.",
            ),
            Self::UnknownTask { .. } => {
                info.with_fix_hint("Add the task to the graph before wiring edges to it.")
            }
            Self::SelfDependency { .. } => {
                info.with_fix_hint("Remove the task from its own dependency list.")
            }
            Self::DuplicateTask { .. } => info.with_fix_hint("Give every task a unique id."),
            Self::EmptyTaskId => info,
        }
    }
}

/// Error raised when a cycle is detected in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in task graph: {}", .cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of tasks forming the cycle; first and last entries are equal.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// The subject of a rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSubject {
    /// A task state transition.
    Task(TaskStatus, TaskStatus),
    /// A run-level transition.
    Run(RunStatus, RunStatus),
}

impl fmt::Display for TransitionSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(from, to) => write!(f, "{from} -> {to}"),
            Self::Run(from, to) => write!(f, "run {from} -> {to}"),
        }
    }
}

/// Error raised when a transition violates the lifecycle rules.
///
/// Always a bug inside the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid state transition for execution '{execution_id}'{}: {subject}{}",
    .task_id.as_deref().map(|t| format!(" task '{t}'")).unwrap_or_default(),
    .reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
pub struct InvalidStateTransition {
    /// The execution id.
    pub execution_id: String,
    /// The task id, if the transition targeted a task.
    pub task_id: Option<String>,
    /// The rejected transition.
    pub subject: TransitionSubject,
    /// Extra context.
    pub reason: Option<String>,
}

impl InvalidStateTransition {
    /// Creates an error for a rejected task transition.
    #[must_use]
    pub fn task(
        execution_id: impl Into<String>,
        task_id: impl Into<String>,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: Some(task_id.into()),
            subject: TransitionSubject::Task(from, to),
            reason: None,
        }
    }

    /// Creates an error for a rejected run transition.
    #[must_use]
    pub fn run(execution_id: impl Into<String>, from: RunStatus, to: RunStatus) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: None,
            subject: TransitionSubject::Run(from, to),
            reason: None,
        }
    }

    /// Attaches a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Category reported by a capability for a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The attempt exceeded its deadline.
    Timeout,
    /// Transient I/O or network failure.
    Transient,
    /// The resource is temporarily unavailable.
    Unavailable,
    /// The request was rejected as invalid.
    Validation,
    /// The data did not match the expected schema.
    Schema,
    /// A bug in the connector or task definition.
    Programming,
    /// The invocation observed a cancellation signal.
    Cancelled,
    /// Anything else.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Unavailable => "unavailable",
            Self::Validation => "validation",
            Self::Schema => "schema",
            Self::Programming => "programming",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Error returned by a capability invocation.
///
/// `message` is what the connector reports; `cause` keeps the full original
/// context for a single detailed log line and is never stored on task state.
#[derive(Debug, Clone, Error)]
#[error("{category}: {message}")]
pub struct InvokeError {
    /// The failure category.
    pub category: ErrorCategory,
    /// Human readable message (may contain secrets, sanitize before storing).
    pub message: String,
    /// Original error with full context.
    pub cause: Option<Arc<anyhow::Error>>,
}

impl InvokeError {
    /// Creates a new invocation error.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches the original error.
    #[must_use]
    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Wraps an arbitrary error, keeping it as the source.
    #[must_use]
    pub fn from_error(category: ErrorCategory, error: anyhow::Error) -> Self {
        Self {
            category,
            message: error.to_string(),
            cause: Some(Arc::new(error)),
        }
    }

    /// A transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    /// A timeout.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// A schema mismatch.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, message)
    }

    /// A cancellation acknowledgement.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, message)
    }

    /// Returns the full context chain of the original error, or the message.
    #[must_use]
    pub fn detailed(&self) -> String {
        match &self.cause {
            Some(cause) => format!("{cause:#}"),
            None => self.message.clone(),
        }
    }
}

/// A classified task failure.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// A failure the retry policy considers transient.
    #[error("Retryable task error: {0}")]
    Retryable(InvokeError),

    /// A failure that must not be retried.
    #[error("Fatal task error: {0}")]
    Fatal(InvokeError),
}

impl TaskError {
    /// Returns the underlying invocation error.
    #[must_use]
    pub fn invoke_error(&self) -> &InvokeError {
        match self {
            Self::Retryable(err) | Self::Fatal(err) => err,
        }
    }

    /// Returns the failure kind recorded on task state.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Retryable(_) => FailureKind::Retryable,
            Self::Fatal(_) => FailureKind::Fatal,
        }
    }
}

/// Error raised when a circuit breaker rejects a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker for resource '{resource}' is open; retry after {retry_after_ms}ms")]
pub struct CircuitOpenError {
    /// The resource identity.
    pub resource: String,
    /// Milliseconds until the breaker admits a probe.
    pub retry_after_ms: u64,
}

/// Error raised when work stops because of cooperative cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cancelled: {reason}")]
pub struct CancelledError {
    /// The cancellation reason.
    pub reason: String,
}

impl CancelledError {
    /// Creates a new cancelled error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
