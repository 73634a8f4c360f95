//! Dependency-resolving scheduler.
//!
//! A [`Scheduler`] accepts validated graphs, creates one execution record per
//! submission and drives it on its own tokio task:
//!
//! - tasks become ready when all their dependencies succeeded
//! - at most `max_parallel_tasks` tasks of a run are in flight
//! - each attempt goes retry policy, then circuit breaker, then executor
//! - a failed task skips every transitive dependent; independent branches
//!   keep running
//! - cancellation stops waiting tasks at once and signals running ones

mod config;
mod dispatch;
mod driver;
mod run;

#[cfg(test)]
mod integration_tests;

pub use config::SchedulerConfig;

use crate::context::ExecutionRecord;
use crate::core::RunStatus;
use crate::errors::{TaskflowError, ValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::ExecutorContract;
use crate::graph::{GraphBuilder, TaskGraph, TaskSpec};
use crate::reliability::{CircuitBreakerMetrics, CircuitBreakerRegistry};
use crate::utils::generate_execution_id;
use dashmap::DashMap;
use driver::RunDriver;
use run::RunState;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Short listing entry for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    /// The execution id.
    pub execution_id: String,
    /// Name of the graph being run.
    pub graph_name: String,
    /// Current run status.
    pub status: RunStatus,
}

/// Runs task graphs against an executor.
pub struct Scheduler {
    config: SchedulerConfig,
    executor: Arc<dyn ExecutorContract>,
    sink: Arc<dyn EventSink>,
    breakers: Arc<CircuitBreakerRegistry>,
    runs: DashMap<String, Arc<RunState>>,
}

impl Scheduler {
    /// Creates a scheduler with its own breaker registry and no event sink.
    #[must_use]
    pub fn new(config: SchedulerConfig, executor: Arc<dyn ExecutorContract>) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        Self {
            config,
            executor,
            sink: Arc::new(NoOpEventSink),
            breakers,
            runs: DashMap::new(),
        }
    }

    /// Sets the sink receiving every transition event.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares a breaker registry, e.g. between schedulers of one process.
    #[must_use]
    pub fn with_breaker_registry(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns the breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Starts a run of `graph` and returns its execution id.
    ///
    /// The graph is shared read-only; any number of runs may use it at once.
    ///
    /// # Errors
    ///
    /// Returns [`TaskflowError::Internal`] when called outside a tokio runtime.
    pub fn submit_graph(&self, graph: Arc<TaskGraph>) -> Result<String, TaskflowError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TaskflowError::Internal(format!("No tokio runtime: {e}")))?;

        let execution_id = generate_execution_id();
        let run = Arc::new(RunState::new(
            execution_id.clone(),
            graph,
            Arc::clone(&self.sink),
        ));
        self.runs.insert(execution_id.clone(), Arc::clone(&run));

        debug!(
            execution_id = %execution_id,
            graph = %run.graph.name(),
            executor = self.executor.name(),
            "Submitting graph"
        );
        let driver = RunDriver::new(
            run,
            self.config.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.breakers),
        );
        runtime.spawn(driver.drive());
        Ok(execution_id)
    }

    /// Validates `tasks` into a graph and starts a run of it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskflowError::Validation`] for an invalid graph; nothing is
    /// executed in that case.
    pub fn submit_tasks(
        &self,
        name: impl Into<String>,
        tasks: impl IntoIterator<Item = TaskSpec>,
    ) -> Result<String, TaskflowError> {
        let graph = GraphBuilder::new(name)
            .tasks(tasks)
            .build()
            .inspect_err(|err: &ValidationError| {
                info!(code = err.code(), error = %err, "Rejected graph submission");
            })?;
        self.submit_graph(Arc::new(graph))
    }

    /// Returns a snapshot of an execution record.
    ///
    /// # Errors
    ///
    /// Returns [`TaskflowError::ExecutionNotFound`] for unknown ids.
    pub fn get_status(&self, execution_id: &str) -> Result<ExecutionRecord, TaskflowError> {
        Ok(self.lookup(execution_id)?.snapshot())
    }

    /// Requests cooperative cancellation of a run.
    ///
    /// Returns `false` if the run had already ended.
    ///
    /// # Errors
    ///
    /// Returns [`TaskflowError::ExecutionNotFound`] for unknown ids.
    pub fn cancel(&self, execution_id: &str, reason: &str) -> Result<bool, TaskflowError> {
        Ok(self.lookup(execution_id)?.cancel(reason))
    }

    /// Waits for a run to end and returns its final record.
    ///
    /// # Errors
    ///
    /// Returns [`TaskflowError::ExecutionNotFound`] for unknown ids and
    /// [`TaskflowError::InvalidTransition`] if the run hit an internal
    /// invariant violation (its record is still finalized as failed).
    pub async fn wait(&self, execution_id: &str) -> Result<ExecutionRecord, TaskflowError> {
        let run = self.lookup(execution_id)?;
        run.wait_done().await;
        if let Some(fault) = run.fault() {
            return Err(fault.into());
        }
        Ok(run.snapshot())
    }

    /// Submits `graph` and waits for the run to end.
    ///
    /// # Errors
    ///
    /// See [`submit_graph`](Self::submit_graph) and [`wait`](Self::wait).
    pub async fn run(&self, graph: Arc<TaskGraph>) -> Result<ExecutionRecord, TaskflowError> {
        let execution_id = self.submit_graph(graph)?;
        self.wait(&execution_id).await
    }

    /// Lists known executions, oldest first.
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionSummary> {
        let mut summaries: Vec<ExecutionSummary> = self
            .runs
            .iter()
            .map(|entry| {
                let record = entry.value().snapshot();
                ExecutionSummary {
                    execution_id: record.execution_id,
                    graph_name: record.graph_name,
                    status: record.status,
                }
            })
            .collect();
        // UUID v7 ids sort by creation millisecond.
        summaries.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
        summaries
    }

    /// Drops a finished execution from memory. Returns true if it was removed.
    pub fn forget(&self, execution_id: &str) -> bool {
        self.runs
            .remove_if(execution_id, |_, run| run.snapshot().is_terminal())
            .is_some()
    }

    /// Metrics of every circuit breaker created so far.
    #[must_use]
    pub fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        self.breakers.snapshot()
    }

    fn lookup(&self, execution_id: &str) -> Result<Arc<RunState>, TaskflowError> {
        self.runs
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TaskflowError::ExecutionNotFound(execution_id.to_string()))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("executor", &self.executor.name())
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}
