//! The run loop: readiness, bounded dispatch, failure propagation, finish.

use super::dispatch::{Dispatch, TaskFinish};
use super::run::RunState;
use super::SchedulerConfig;
use crate::core::{FailureKind, LastError, RunStatus, TaskStatus};
use crate::errors::{ErrorCategory, InvalidStateTransition};
use crate::executor::ExecutorContract;
use crate::reliability::CircuitBreakerRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type InFlight = FuturesUnordered<JoinHandle<(String, TaskFinish)>>;

/// Drives one run from `Pending` to a terminal status.
pub(crate) struct RunDriver {
    run: Arc<RunState>,
    config: SchedulerConfig,
    executor: Arc<dyn ExecutorContract>,
    breakers: Arc<CircuitBreakerRegistry>,
    /// Unfinished dependencies per task.
    remaining: HashMap<String, usize>,
    ready: VecDeque<String>,
    in_flight: InFlight,
    cancel_applied: bool,
}

impl RunDriver {
    pub(crate) fn new(
        run: Arc<RunState>,
        config: SchedulerConfig,
        executor: Arc<dyn ExecutorContract>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let remaining = run
            .graph
            .tasks()
            .map(|task| (task.id.clone(), task.dependencies.len()))
            .collect();
        Self {
            run,
            config,
            executor,
            breakers,
            remaining,
            ready: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            cancel_applied: false,
        }
    }

    /// Runs to completion. Never returns an error: invariant violations are
    /// recorded on the run state and the run is finalized as failed.
    pub(crate) async fn drive(mut self) {
        if let Err(fault) = self.schedule().await {
            self.run.set_fault(fault);
            self.abort().await;
        }
        self.run.mark_done();
    }

    async fn schedule(&mut self) -> Result<(), InvalidStateTransition> {
        self.run.apply(|record| record.start())?;
        info!(
            execution_id = %self.run.execution_id,
            graph = %self.run.graph.name(),
            tasks = self.run.graph.len(),
            "Run started"
        );

        let graph = Arc::clone(&self.run.graph);
        if let Some(first_layer) = graph.topological_layers().first() {
            for root in first_layer {
                self.make_ready(root)?;
            }
        }

        loop {
            if self.run.token.is_cancelled() && !self.cancel_applied {
                self.apply_cancel()?;
            }
            self.fill_slots()?;

            if self.in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = self.in_flight.next() => {
                    let (task_id, finish) = match joined {
                        Ok(done) => done,
                        Err(join_error) => return Err(self.lost_task(&join_error)),
                    };
                    self.on_finish(&task_id, finish)?;
                }
                () = self.run.token.cancelled(), if !self.cancel_applied => {}
            }

            if let Some(fault) = self.run.fault() {
                return Err(fault);
            }
        }

        let record = self.run.snapshot();
        let outcome = record.outcome();
        let error = match outcome {
            RunStatus::Failed => Some(format!(
                "Failed tasks: {}",
                record.tasks_in(TaskStatus::Failed).join(", ")
            )),
            RunStatus::Cancelled => record
                .cancel_requested
                .then(|| self.run.token.reason().unwrap_or_else(|| "cancelled".to_string())),
            _ => None,
        };
        self.run
            .apply(|record| record.finish(outcome, error.as_deref()))?;

        let record = self.run.snapshot();
        info!(
            execution_id = %self.run.execution_id,
            status = %record.status,
            succeeded = record.metrics.succeeded,
            failed = record.metrics.failed,
            skipped = record.metrics.skipped,
            cancelled = record.metrics.cancelled,
            duration_ms = record.metrics.duration_ms,
            "Run finished"
        );
        Ok(())
    }

    fn make_ready(&mut self, task_id: &str) -> Result<(), InvalidStateTransition> {
        self.run.transition(task_id, TaskStatus::Ready, None)?;
        self.ready.push_back(task_id.to_string());
        Ok(())
    }

    /// Starts ready tasks until the parallelism bound is reached.
    fn fill_slots(&mut self) -> Result<(), InvalidStateTransition> {
        let limit = self.config.parallelism();
        while self.in_flight.len() < limit {
            let Some(task_id) = self.ready.pop_front() else {
                break;
            };
            self.run.transition(&task_id, TaskStatus::Running, None)?;
            self.spawn_dispatch(&task_id);
        }
        Ok(())
    }

    fn spawn_dispatch(&mut self, task_id: &str) {
        let Some(task) = self.run.graph.task(task_id).cloned() else {
            return;
        };
        let policy = task
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.config.default_retry_policy.clone());
        let timeout = task.timeout().or_else(|| self.config.task_timeout());
        let dispatch = Dispatch {
            run: Arc::clone(&self.run),
            executor: Arc::clone(&self.executor),
            breaker: self.breakers.get_or_create(task.resource_id()),
            task,
            policy,
            timeout,
        };
        self.in_flight.push(tokio::spawn(dispatch.run()));
    }

    fn on_finish(&mut self, task_id: &str, finish: TaskFinish) -> Result<(), InvalidStateTransition> {
        match finish {
            TaskFinish::Succeeded => {
                self.run.transition(task_id, TaskStatus::Succeeded, None)?;
                self.release_dependents(task_id)?;
            }
            TaskFinish::Failed(last_error) => {
                self.run
                    .transition(task_id, TaskStatus::Failed, Some(last_error))?;
                self.close_descendants(task_id, TaskStatus::Skipped, None)?;
            }
            TaskFinish::Cancelled(reason) => {
                let detail = LastError::cancelled(&reason);
                self.run
                    .transition(task_id, TaskStatus::Cancelled, Some(detail.clone()))?;
                self.close_descendants(task_id, TaskStatus::Cancelled, Some(detail))?;
            }
        }
        Ok(())
    }

    /// Decrements dependency counters and readies tasks that reach zero.
    fn release_dependents(&mut self, task_id: &str) -> Result<(), InvalidStateTransition> {
        let graph = Arc::clone(&self.run.graph);
        let Some(dependents) = graph.dependents(task_id) else {
            return Ok(());
        };
        for dependent in dependents {
            let Some(count) = self.remaining.get_mut(dependent) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && self.run.task_status(dependent) == Some(TaskStatus::Pending) {
                self.make_ready(dependent)?;
            }
        }
        Ok(())
    }

    /// Moves every non-terminal descendant of `task_id` to `to`.
    fn close_descendants(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        detail: Option<LastError>,
    ) -> Result<(), InvalidStateTransition> {
        let graph = Arc::clone(&self.run.graph);
        for descendant in graph.descendants(task_id) {
            let active = self
                .run
                .task_status(&descendant)
                .is_some_and(|status| !status.is_terminal());
            if active {
                self.ready.retain(|id| id != &descendant);
                self.run.transition(&descendant, to, detail.clone())?;
            }
        }
        Ok(())
    }

    /// Cancels every task that has not been dispatched yet.
    fn apply_cancel(&mut self) -> Result<(), InvalidStateTransition> {
        self.cancel_applied = true;
        let reason = self
            .run
            .token
            .reason()
            .unwrap_or_else(|| "cancelled".to_string());
        let detail = LastError::cancelled(&reason);
        self.ready.clear();

        let mut waiting = self.run.tasks_in(TaskStatus::Ready);
        waiting.extend(self.run.tasks_in(TaskStatus::Pending));
        for task_id in waiting {
            self.run
                .transition(&task_id, TaskStatus::Cancelled, Some(detail.clone()))?;
        }
        Ok(())
    }

    fn lost_task(&self, join_error: &tokio::task::JoinError) -> InvalidStateTransition {
        error!(
            execution_id = %self.run.execution_id,
            error = %join_error,
            "Dispatch task ended abnormally"
        );
        let record = self.run.snapshot();
        InvalidStateTransition::run(&self.run.execution_id, record.status, RunStatus::Failed)
            .with_reason(format!("dispatch task ended abnormally: {join_error}"))
    }

    /// Stops outstanding work and forces the record into `Failed`.
    async fn abort(&mut self) {
        warn!(execution_id = %self.run.execution_id, "Aborting run after invariant violation");
        self.run.token.cancel("internal error");
        while let Some(joined) = self.in_flight.next().await {
            if let Err(join_error) = joined {
                warn!(error = %join_error, "Dispatch task ended abnormally during abort");
            }
        }

        let detail = LastError::new(FailureKind::Fatal, "Run aborted after an internal error")
            .with_category(ErrorCategory::Programming);
        let record = self.run.snapshot();
        for (task_id, state) in &record.tasks {
            if state.status.is_terminal() {
                continue;
            }
            let to = if state.status == TaskStatus::Running {
                TaskStatus::Failed
            } else {
                TaskStatus::Cancelled
            };
            if let Err(err) = self.run.transition(task_id, to, Some(detail.clone())) {
                error!(error = %err, "Could not close task during abort");
            }
        }

        if record.status == RunStatus::Pending {
            if let Err(err) = self.run.apply(|record| record.start()) {
                error!(error = %err, "Could not start run during abort");
            }
        }
        if let Err(err) = self
            .run
            .apply(|record| record.finish(RunStatus::Failed, Some("internal error")))
        {
            error!(error = %err, "Could not finalize aborted run");
        }
    }
}
