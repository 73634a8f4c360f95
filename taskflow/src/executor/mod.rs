//! Executor contract and its local and distributed implementations.
//!
//! The scheduler only sees [`ExecutorContract`]; whether an attempt runs on
//! an in-process worker pool or goes through a work queue is decided by
//! whoever constructs the scheduler.

mod distributed;
mod local;
mod queue;

pub use distributed::{DistributedExecutor, ResultNotification, TaskDescriptor, TaskOutcome, WorkQueue};
pub use local::LocalExecutor;
pub use queue::{InMemoryWorkQueue, QueueReceiver, QueueWorker};

use crate::cancellation::CancellationToken;
use crate::capability::CapabilityHandle;
use crate::errors::InvokeError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One attempt of one task, as handed to an executor.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    /// The execution the task belongs to.
    pub execution_id: String,
    /// The task id.
    pub task_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// What to invoke.
    pub capability: CapabilityHandle,
    /// The run's cancellation token.
    pub token: Arc<CancellationToken>,
    /// Upper bound on the attempt once it holds its execution slot.
    pub timeout: Option<Duration>,
}

impl TaskInvocation {
    /// Creates an invocation for the given attempt.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        task_id: impl Into<String>,
        attempt: u32,
        capability: CapabilityHandle,
        token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: task_id.into(),
            attempt,
            capability,
            token,
            timeout: None,
        }
    }

    /// Bounds the attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

fn attempt_timeout(limit: Duration) -> InvokeError {
    InvokeError::timeout(format!("Attempt exceeded {}ms", limit.as_millis()))
}

/// Runs a single task attempt and reports its result.
///
/// Implementations must honor `invocation.token`: once it fires, they should
/// stop waiting and return an error with category `Cancelled`. They must also
/// fail the attempt with category `Timeout` once `invocation.timeout` elapses.
/// Time spent waiting for a worker slot does not count against it.
#[async_trait]
pub trait ExecutorContract: Send + Sync {
    /// Submits one attempt and awaits its result.
    async fn submit(&self, invocation: TaskInvocation) -> Result<Value, InvokeError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
