//! One task's trip through the reliability layer to the executor.

use super::run::RunState;
use crate::core::LastError;
use crate::errors::{ErrorCategory, InvokeError};
use crate::executor::{ExecutorContract, TaskInvocation};
use crate::graph::TaskSpec;
use crate::observability::SpanTimer;
use crate::reliability::{retry_with_backoff, CircuitBreaker, RetryError, RetryPolicy};
use crate::utils::sanitize_message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How a dispatched task ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TaskFinish {
    Succeeded,
    Failed(LastError),
    Cancelled(String),
}

/// Everything a dispatched task needs, owned so it can run on its own tokio task.
pub(crate) struct Dispatch {
    pub(crate) run: Arc<RunState>,
    pub(crate) executor: Arc<dyn ExecutorContract>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) task: TaskSpec,
    pub(crate) policy: RetryPolicy,
    pub(crate) timeout: Option<Duration>,
}

impl Dispatch {
    /// Runs the task to a final result: retry around breaker around
    /// executor, each attempt bounded by the executor through the timeout.
    pub(crate) async fn run(self) -> (String, TaskFinish) {
        let run = self.run.as_ref();
        let executor = self.executor.as_ref();
        let breaker = self.breaker.as_ref();
        let task = &self.task;
        let timeout = self.timeout;
        let timer = SpanTimer::start(task.id.clone());

        let result = retry_with_backoff(&self.policy, &run.token, move |_| async move {
            breaker
                .call(move || async move {
                    let attempt = run.record_attempt(&task.id).map_err(|fault| {
                        run.set_fault(fault);
                        InvokeError::new(
                            ErrorCategory::Programming,
                            "Execution record rejected the attempt",
                        )
                    })?;
                    debug!(
                        execution_id = %run.execution_id,
                        task_id = %task.id,
                        attempt,
                        executor = executor.name(),
                        resource = %task.resource_id(),
                        "Dispatching attempt"
                    );
                    let invocation = TaskInvocation::new(
                        run.execution_id.clone(),
                        task.id.clone(),
                        attempt,
                        task.capability.clone(),
                        Arc::clone(&run.token),
                    )
                    .with_timeout(timeout);
                    executor.submit(invocation).await
                })
                .await
        })
        .await;

        let finish = match result {
            Ok(_) => TaskFinish::Succeeded,
            Err(RetryError::Task { error: err, attempts }) => {
                let invoke = err.invoke_error();
                // The one place the full cause chain is logged.
                error!(
                    execution_id = %run.execution_id,
                    task_id = %task.id,
                    attempts,
                    kind = %err.kind(),
                    category = %invoke.category,
                    detail = %sanitize_message(&invoke.detailed()),
                    "Task failed"
                );
                TaskFinish::Failed(LastError::from_task_error(&err))
            }
            Err(RetryError::CircuitOpen(err)) => {
                warn!(
                    execution_id = %run.execution_id,
                    task_id = %task.id,
                    resource = %err.resource,
                    retry_after_ms = err.retry_after_ms,
                    "Circuit open, failing task without invoking it"
                );
                TaskFinish::Failed(LastError::from_circuit_open(&err))
            }
            Err(RetryError::Cancelled(err)) => TaskFinish::Cancelled(err.reason),
        };
        debug!(
            execution_id = %run.execution_id,
            task_id = %timer.name(),
            duration_ms = timer.elapsed_ms(),
            outcome = ?finish,
            "Task dispatch finished"
        );

        (self.task.id.clone(), finish)
    }
}
