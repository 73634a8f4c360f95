//! Sanitized failure detail stored on task state and run records.

use crate::errors::{CircuitOpenError, ErrorCategory, InvokeError, TaskError};
use crate::utils::sanitize_message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a task ended up failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A retryable failure (retries exhausted if terminal).
    Retryable,
    /// A failure the policy never retries.
    Fatal,
    /// The resource's circuit breaker rejected the call.
    CircuitOpen,
    /// The work was cancelled.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::Fatal => write!(f, "fatal"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The externally visible error of a task.
///
/// The message is always passed through the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// The failure kind.
    pub kind: FailureKind,
    /// The connector-reported category, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// Sanitized message.
    pub message: String,
}

impl LastError {
    /// Creates a new error detail, sanitizing the message.
    #[must_use]
    pub fn new(kind: FailureKind, message: &str) -> Self {
        Self {
            kind,
            category: None,
            message: sanitize_message(message),
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Builds the detail for a classified task error.
    #[must_use]
    pub fn from_task_error(err: &TaskError) -> Self {
        Self::from_invoke_error(err.kind(), err.invoke_error())
    }

    /// Builds the detail for a connector error with an explicit kind.
    #[must_use]
    pub fn from_invoke_error(kind: FailureKind, err: &InvokeError) -> Self {
        Self::new(kind, &err.message).with_category(err.category)
    }

    /// Builds the detail for a breaker rejection.
    #[must_use]
    pub fn from_circuit_open(err: &CircuitOpenError) -> Self {
        Self::new(FailureKind::CircuitOpen, &err.to_string())
    }

    /// Builds the detail for a cancellation.
    #[must_use]
    pub fn cancelled(reason: &str) -> Self {
        Self::new(FailureKind::Cancelled, reason).with_category(ErrorCategory::Cancelled)
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
