//! Run and task status enums with their legal transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a single task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies.
    #[default]
    Pending,
    /// All dependencies succeeded; waiting for a worker slot.
    Ready,
    /// Dispatched to the executor.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed terminally.
    Failed,
    /// Not executed because an ancestor failed.
    Skipped,
    /// Stopped by run cancellation.
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if moving from `self` to `next` is allowed.
    ///
    /// `PENDING -> READY -> RUNNING -> {SUCCEEDED, FAILED}`; `RUNNING` may also
    /// be cancelled; any non-terminal state may be skipped, and `PENDING`/`READY`
    /// tasks may be cancelled without dispatch.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Ready)
            | (Self::Ready, Self::Running)
            | (Self::Running, Self::Succeeded | Self::Failed) => true,
            (Self::Pending | Self::Ready | Self::Running, Self::Cancelled | Self::Skipped) => true,
            _ => false,
        }
    }
}

/// The overall status of one run of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not started.
    #[default]
    Pending,
    /// At least one task is pending, ready or running.
    Running,
    /// Every task succeeded or was skipped, none failed.
    Succeeded,
    /// At least one task failed.
    Failed,
    /// The caller cancelled the run.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
                | (Self::Pending, Self::Cancelled)
        )
    }
}
