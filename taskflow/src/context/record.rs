//! Mutable run-time record of one execution.

use crate::core::{LastError, RunStatus, TaskStatus, TransitionEvent};
use crate::errors::InvalidStateTransition;
use crate::graph::TaskGraph;
use crate::utils::{elapsed_ms, now_utc, sanitize_message, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-task runtime state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskState {
    /// Current status.
    pub status: TaskStatus,
    /// Attempts started so far.
    pub attempt_count: u32,
    /// When the task entered `Running`.
    pub started_at: Option<Timestamp>,
    /// When the task reached a terminal status.
    pub ended_at: Option<Timestamp>,
    /// Sanitized error of the last failure.
    pub last_error: Option<LastError>,
}

/// Aggregate counters of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Tasks in the graph.
    pub total_tasks: usize,
    /// Tasks that succeeded.
    pub succeeded: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Tasks skipped because an ancestor failed.
    pub skipped: usize,
    /// Tasks cancelled.
    pub cancelled: usize,
    /// Attempts across all tasks.
    pub total_attempts: u64,
    /// Wall time of the run, set once terminal.
    pub duration_ms: Option<u64>,
}

/// The run-time state of one execution of a graph.
///
/// Mutated only by the scheduler driving the run, and only through
/// [`transition`](Self::transition), [`record_attempt`](Self::record_attempt),
/// [`start`](Self::start) and [`finish`](Self::finish). Once terminal, every
/// further mutation is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique id of this execution.
    pub execution_id: String,
    /// Name of the graph being run.
    pub graph_name: String,
    /// Overall status.
    pub status: RunStatus,
    /// Per-task state keyed by task id.
    pub tasks: BTreeMap<String, TaskState>,
    /// When the run started.
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    pub ended_at: Option<Timestamp>,
    /// Aggregate counters.
    pub metrics: ExecutionMetrics,
    /// Terminal error summary, sanitized.
    pub error: Option<String>,
    /// Whether the caller asked for cancellation.
    pub cancel_requested: bool,
}

impl ExecutionRecord {
    /// Creates a record with every task `Pending`.
    #[must_use]
    pub fn create(execution_id: impl Into<String>, graph: &TaskGraph) -> Self {
        let tasks: BTreeMap<String, TaskState> = graph
            .task_ids()
            .iter()
            .map(|id| (id.clone(), TaskState::default()))
            .collect();

        Self {
            execution_id: execution_id.into(),
            graph_name: graph.name().to_string(),
            status: RunStatus::Pending,
            metrics: ExecutionMetrics {
                total_tasks: tasks.len(),
                ..ExecutionMetrics::default()
            },
            tasks,
            started_at: None,
            ended_at: None,
            error: None,
            cancel_requested: false,
        }
    }

    /// Returns true once the run is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns a task's state.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<&TaskState> {
        self.tasks.get(task_id)
    }

    /// Returns a task's status.
    #[must_use]
    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|state| state.status)
    }

    /// Ids of tasks in the given status.
    #[must_use]
    pub fn tasks_in(&self, status: TaskStatus) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, state)| state.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Returns true if every task is terminal.
    #[must_use]
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|state| state.status.is_terminal())
    }

    /// Applies a task transition.
    ///
    /// Metrics and timestamps are updated together with the status. `error`
    /// is stored as the task's `last_error` when the new status is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStateTransition`] if the run is terminal, the task is
    /// unknown, or the lifecycle does not allow the move.
    pub fn transition(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        error: Option<LastError>,
    ) -> Result<TransitionEvent, InvalidStateTransition> {
        let Some(state) = self.tasks.get(task_id) else {
            return Err(InvalidStateTransition::task(
                &self.execution_id,
                task_id,
                TaskStatus::Pending,
                to,
            )
            .with_reason("task is not part of this execution"));
        };
        let from = state.status;

        if self.status.is_terminal() {
            return Err(
                InvalidStateTransition::task(&self.execution_id, task_id, from, to)
                    .with_reason(format!("execution is already {}", self.status)),
            );
        }
        if !from.can_transition_to(to) {
            return Err(InvalidStateTransition::task(
                &self.execution_id,
                task_id,
                from,
                to,
            ));
        }

        let now = now_utc();
        let attempt;
        {
            let Some(state) = self.tasks.get_mut(task_id) else {
                return Err(InvalidStateTransition::task(&self.execution_id, task_id, from, to));
            };
            state.status = to;
            if to == TaskStatus::Running {
                state.started_at = Some(now);
            }
            if to.is_terminal() {
                state.ended_at = Some(now);
                if error.is_some() {
                    state.last_error.clone_from(&error);
                }
            }
            attempt = state.attempt_count;
        }

        match to {
            TaskStatus::Succeeded => self.metrics.succeeded += 1,
            TaskStatus::Failed => self.metrics.failed += 1,
            TaskStatus::Skipped => self.metrics.skipped += 1,
            TaskStatus::Cancelled => self.metrics.cancelled += 1,
            TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Running => {}
        }

        Ok(
            TransitionEvent::task(&self.execution_id, task_id, from, to, now)
                .with_attempt(attempt)
                .with_error(error),
        )
    }

    /// Counts a new attempt of a `Running` task and returns its number.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStateTransition`] if the task is not running or the
    /// run is terminal.
    pub fn record_attempt(&mut self, task_id: &str) -> Result<u32, InvalidStateTransition> {
        let terminal = self.status.is_terminal();
        let execution_id = &self.execution_id;
        let Some(state) = self.tasks.get_mut(task_id) else {
            return Err(InvalidStateTransition::task(
                execution_id,
                task_id,
                TaskStatus::Pending,
                TaskStatus::Running,
            )
            .with_reason("task is not part of this execution"));
        };
        if terminal || state.status != TaskStatus::Running {
            return Err(InvalidStateTransition::task(
                execution_id,
                task_id,
                state.status,
                TaskStatus::Running,
            )
            .with_reason("attempts can only be recorded while running"));
        }

        state.attempt_count += 1;
        self.metrics.total_attempts += 1;
        Ok(state.attempt_count)
    }

    /// Marks the run `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStateTransition`] unless the run is `Pending`.
    pub fn start(&mut self) -> Result<TransitionEvent, InvalidStateTransition> {
        let from = self.status;
        if !from.can_transition_to(RunStatus::Running) {
            return Err(InvalidStateTransition::run(
                &self.execution_id,
                from,
                RunStatus::Running,
            ));
        }

        let now = now_utc();
        self.status = RunStatus::Running;
        self.started_at = Some(now);
        Ok(TransitionEvent::run(&self.execution_id, from, RunStatus::Running, now))
    }

    /// Records that cancellation was requested. No-op once terminal.
    pub fn request_cancel(&mut self) {
        if !self.status.is_terminal() {
            self.cancel_requested = true;
        }
    }

    /// The terminal status the run should end with, given its task states.
    ///
    /// Requested cancellation wins; otherwise any failed task fails the run,
    /// and any cancelled task cancels it.
    #[must_use]
    pub fn outcome(&self) -> RunStatus {
        if self.cancel_requested {
            RunStatus::Cancelled
        } else if self.metrics.failed > 0 {
            RunStatus::Failed
        } else if self.metrics.cancelled > 0 {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        }
    }

    /// Moves the run to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStateTransition`] if `to` is not terminal, the run is
    /// not `Running`, or a task is still active.
    pub fn finish(
        &mut self,
        to: RunStatus,
        error: Option<&str>,
    ) -> Result<TransitionEvent, InvalidStateTransition> {
        let from = self.status;
        if !to.is_terminal() || !from.can_transition_to(to) {
            return Err(InvalidStateTransition::run(&self.execution_id, from, to));
        }
        if from == RunStatus::Running && !self.all_tasks_terminal() {
            return Err(InvalidStateTransition::run(&self.execution_id, from, to)
                .with_reason("tasks are still active"));
        }

        let now = now_utc();
        self.status = to;
        self.ended_at = Some(now);
        self.error = error.map(sanitize_message);
        self.metrics.duration_ms = self.started_at.map(|start| elapsed_ms(start, now));
        Ok(TransitionEvent::run(&self.execution_id, from, to, now))
    }
}
