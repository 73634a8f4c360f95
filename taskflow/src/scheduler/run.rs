//! Shared state of one run.

use crate::cancellation::CancellationToken;
use crate::context::ExecutionRecord;
use crate::core::{LastError, StatusValue, TaskStatus, TransitionEvent};
use crate::errors::InvalidStateTransition;
use crate::events::EventSink;
use crate::graph::TaskGraph;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// One run: its graph, its record behind the single-writer lock, and the
/// signals used to stop it and to observe its end.
pub(crate) struct RunState {
    pub(crate) execution_id: String,
    pub(crate) graph: Arc<TaskGraph>,
    pub(crate) token: Arc<CancellationToken>,
    record: Mutex<ExecutionRecord>,
    sink: Arc<dyn EventSink>,
    fault: Mutex<Option<InvalidStateTransition>>,
    done: watch::Sender<bool>,
}

impl RunState {
    pub(crate) fn new(
        execution_id: String,
        graph: Arc<TaskGraph>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let record = ExecutionRecord::create(execution_id.clone(), &graph);
        let (done, _) = watch::channel(false);
        Self {
            execution_id,
            graph,
            token: Arc::new(CancellationToken::new()),
            record: Mutex::new(record),
            sink,
            fault: Mutex::new(None),
            done,
        }
    }

    /// Applies one mutation under the lock, then logs and emits its event.
    pub(crate) fn apply<F>(&self, mutate: F) -> Result<(), InvalidStateTransition>
    where
        F: FnOnce(&mut ExecutionRecord) -> Result<TransitionEvent, InvalidStateTransition>,
    {
        let event = {
            let mut record = self.record.lock();
            mutate(&mut record)?
        };
        log_transition(&event);
        self.sink.emit(&event);
        Ok(())
    }

    pub(crate) fn transition(
        &self,
        task_id: &str,
        to: TaskStatus,
        error: Option<LastError>,
    ) -> Result<(), InvalidStateTransition> {
        self.apply(|record| record.transition(task_id, to, error))
    }

    pub(crate) fn record_attempt(&self, task_id: &str) -> Result<u32, InvalidStateTransition> {
        self.record.lock().record_attempt(task_id)
    }

    pub(crate) fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.record.lock().task_status(task_id)
    }

    /// Task ids currently in `status`.
    pub(crate) fn tasks_in(&self, status: TaskStatus) -> Vec<String> {
        self.record
            .lock()
            .tasks_in(status)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn snapshot(&self) -> ExecutionRecord {
        self.record.lock().clone()
    }

    /// Flags cancellation on the record, then fires the token.
    ///
    /// Returns false if the run already ended.
    pub(crate) fn cancel(&self, reason: &str) -> bool {
        {
            let mut record = self.record.lock();
            if record.is_terminal() {
                return false;
            }
            record.request_cancel();
        }
        info!(execution_id = %self.execution_id, reason, "Cancellation requested");
        self.token.cancel(reason);
        true
    }

    /// Remembers the first invariant violation of this run.
    pub(crate) fn set_fault(&self, fault: InvalidStateTransition) {
        let mut slot = self.fault.lock();
        if slot.is_some() {
            return;
        }
        error!(
            execution_id = %self.execution_id,
            error = %fault,
            "Execution record rejected a transition"
        );
        *slot = Some(fault);
    }

    pub(crate) fn fault(&self) -> Option<InvalidStateTransition> {
        self.fault.lock().clone()
    }

    pub(crate) fn mark_done(&self) {
        self.done.send_replace(true);
    }

    /// Completes once the run has reached a terminal status.
    pub(crate) async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}

fn log_transition(event: &TransitionEvent) {
    let task_id = event.task_id.as_deref().unwrap_or("-");
    match event.new_status {
        StatusValue::Run(_) => info!(
            execution_id = %event.execution_id,
            from = %event.old_status,
            to = %event.new_status,
            "Run transition"
        ),
        StatusValue::Task(_) => debug!(
            execution_id = %event.execution_id,
            task_id,
            from = %event.old_status,
            to = %event.new_status,
            attempt = event.attempt,
            "Task transition"
        ),
    }
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("execution_id", &self.execution_id)
            .field("graph", &self.graph.name())
            .finish_non_exhaustive()
    }
}
