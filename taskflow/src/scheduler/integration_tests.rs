//! Run-level scenarios driving the scheduler end to end.

use super::*;
use crate::cancellation::CancellationToken;
use crate::capability::{Capability, CapabilityHandle, CapabilityRegistry};
use crate::core::{FailureKind, StatusValue, TaskStatus, TransitionEvent};
use crate::errors::{ErrorCategory, InvokeError};
use crate::events::{CollectingEventSink, InMemoryExecutionStore, MockEventSink};
use crate::executor::{DistributedExecutor, InMemoryWorkQueue, LocalExecutor, QueueWorker};
use crate::reliability::{CircuitBreakerConfig, CircuitState, RetryPolicy};
use crate::testing::{
    assert_all_tasks, assert_run_status, assert_task_attempts, assert_task_status,
    CountingCapability, ScriptedCapability, SlowCapability,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
}

fn task(id: &str, type_name: &str) -> TaskSpec {
    TaskSpec::new(id, CapabilityHandle::new(type_name, format!("{type_name}-resource")))
}

struct Harness {
    scheduler: Scheduler,
    registry: Arc<CapabilityRegistry>,
    events: Arc<CollectingEventSink>,
}

impl Harness {
    fn new(config: SchedulerConfig) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let events = Arc::new(CollectingEventSink::new());
        let executor = Arc::new(LocalExecutor::new(Arc::clone(&registry), 16));
        let scheduler = Scheduler::new(config, executor).with_event_sink(events.clone());
        Self {
            scheduler,
            registry,
            events,
        }
    }

    fn standard() -> Self {
        Self::new(SchedulerConfig::default().with_default_retry_policy(fast_retry()))
    }

    fn register(&self, type_name: &str, capability: Arc<dyn Capability>) {
        self.registry.register(type_name, capability);
    }

    async fn run(&self, tasks: Vec<TaskSpec>) -> ExecutionRecord {
        let graph = Arc::new(TaskGraph::from_tasks("test", tasks).unwrap());
        self.scheduler.run(graph).await.unwrap()
    }
}

/// Fails every call with a transient error and records when each call began.
#[derive(Default)]
struct TimedFailure {
    calls: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Capability for TimedFailure {
    async fn invoke(
        &self,
        _handle: &CapabilityHandle,
        _token: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.calls.lock().push(tokio::time::Instant::now());
        Err(InvokeError::transient("connection reset"))
    }
}

/// Succeeds after a random short delay, shuffling completion order.
struct Jitter;

#[async_trait]
impl Capability for Jitter {
    async fn invoke(
        &self,
        _handle: &CapabilityHandle,
        _token: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        let delay = rand::thread_rng().gen_range(0..8);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Value::Null)
    }
}

fn index_of(events: &[TransitionEvent], task_id: &str, status: TaskStatus) -> Option<usize> {
    events.iter().position(|event| {
        event.task_id.as_deref() == Some(task_id) && event.new_status == StatusValue::Task(status)
    })
}

#[tokio::test]
async fn test_diamond_with_failed_root_skips_everything_below() {
    let harness = Harness::standard();
    let ok = Arc::new(CountingCapability::new(json!("ok")));
    harness.register("ok", ok.clone());
    harness.register(
        "bad",
        Arc::new(ScriptedCapability::always_failing(InvokeError::schema(
            "column 'total' missing",
        ))),
    );

    let record = harness
        .run(vec![
            task("a", "bad"),
            task("b", "ok").depends_on("a"),
            task("c", "ok").depends_on("a"),
            task("d", "ok").with_dependencies(["b", "c"]),
        ])
        .await;

    assert_task_status(&record, "a", TaskStatus::Failed);
    assert_all_tasks(&record, &["b", "c", "d"], TaskStatus::Skipped);
    assert_run_status(&record, RunStatus::Failed);
    assert_eq!(ok.calls(), 0);

    let last_error = record.task("a").unwrap().last_error.clone().unwrap();
    assert_eq!(last_error.kind, FailureKind::Fatal);
    assert_eq!(last_error.category, Some(ErrorCategory::Schema));
    assert_task_attempts(&record, "a", 1);
    assert_eq!(record.metrics.failed, 1);
    assert_eq!(record.metrics.skipped, 3);
    assert!(record.error.as_deref().unwrap().contains('a'));
}

#[tokio::test]
async fn test_independent_branch_completes_after_sibling_failure() {
    let harness = Harness::standard();
    harness.register("ok", Arc::new(CountingCapability::new(json!(1))));
    harness.register(
        "bad",
        Arc::new(ScriptedCapability::always_failing(InvokeError::new(
            ErrorCategory::Validation,
            "rejected",
        ))),
    );

    let record = harness
        .run(vec![
            task("extract", "bad"),
            task("load", "ok").depends_on("extract"),
            task("audit", "ok"),
            task("report", "ok").depends_on("audit"),
        ])
        .await;

    assert_task_status(&record, "load", TaskStatus::Skipped);
    assert_all_tasks(&record, &["audit", "report"], TaskStatus::Succeeded);
    assert_run_status(&record, RunStatus::Failed);
}

#[tokio::test]
async fn test_parallelism_bound_of_one_still_completes() {
    let harness = Harness::new(SchedulerConfig::default().with_max_parallel_tasks(1));
    let counting = Arc::new(CountingCapability::new(json!(null)).with_delay(Duration::from_millis(10)));
    harness.register("work", counting.clone());

    let record = harness.run(vec![task("a", "work"), task("b", "work")]).await;

    assert_all_tasks(&record, &["a", "b"], TaskStatus::Succeeded);
    assert_run_status(&record, RunStatus::Succeeded);
    assert_eq!(counting.calls(), 2);
    assert_eq!(counting.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_parallel_tasks_overlap_up_to_the_bound() {
    let harness = Harness::new(SchedulerConfig::default().with_max_parallel_tasks(2));
    let counting = Arc::new(CountingCapability::new(json!(null)).with_delay(Duration::from_millis(20)));
    harness.register("work", counting.clone());

    let record = harness
        .run((0..6).map(|i| task(&format!("t{i}"), "work")).collect())
        .await;

    assert_run_status(&record, RunStatus::Succeeded);
    assert_eq!(counting.calls(), 6);
    assert_eq!(counting.peak_concurrency(), 2);
}

#[tokio::test]
async fn test_cancel_while_running_cancels_running_and_pending() {
    let harness = Harness::standard();
    let slow = Arc::new(SlowCapability::new(Duration::from_secs(60)));
    harness.register("slow", slow.clone());
    harness.register("ok", Arc::new(CountingCapability::new(json!(null))));

    let graph = Arc::new(
        TaskGraph::from_tasks("cancel", [task("a", "slow"), task("b", "ok").depends_on("a")]).unwrap(),
    );
    let execution_id = harness.scheduler.submit_graph(graph).unwrap();

    while slow.started() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let running = harness.scheduler.get_status(&execution_id).unwrap();
    assert_task_status(&running, "a", TaskStatus::Running);
    assert_task_status(&running, "b", TaskStatus::Pending);

    assert!(harness.scheduler.cancel(&execution_id, "operator request").unwrap());
    let record = harness.scheduler.wait(&execution_id).await.unwrap();

    assert_all_tasks(&record, &["a", "b"], TaskStatus::Cancelled);
    assert_run_status(&record, RunStatus::Cancelled);
    assert!(record.cancel_requested);
    assert_eq!(record.error.as_deref(), Some("operator request"));
    assert_eq!(slow.completed(), 0);

    let a_error = record.task("a").unwrap().last_error.clone().unwrap();
    assert_eq!(a_error.kind, FailureKind::Cancelled);

    // B went straight from PENDING to CANCELLED.
    let b_events = harness.events.events_for_task("b");
    assert_eq!(b_events.len(), 1);
    assert_eq!(b_events[0].old_status, StatusValue::Task(TaskStatus::Pending));

    assert!(!harness.scheduler.cancel(&execution_id, "again").unwrap());
}

#[tokio::test]
async fn test_tasks_never_start_before_dependencies_succeed() {
    let harness = Harness::new(SchedulerConfig::default().with_max_parallel_tasks(3));
    harness.register("jitter", Arc::new(Jitter));

    let tasks = vec![
        task("a", "jitter"),
        task("b", "jitter"),
        task("c", "jitter").depends_on("a"),
        task("d", "jitter").with_dependencies(["a", "b"]),
        task("e", "jitter").depends_on("c"),
        task("f", "jitter").with_dependencies(["d", "e"]),
        task("g", "jitter"),
    ];
    let graph = Arc::new(TaskGraph::from_tasks("soundness", tasks).unwrap());

    for _ in 0..5 {
        harness.events.clear();
        let record = harness.scheduler.run(Arc::clone(&graph)).await.unwrap();
        assert_run_status(&record, RunStatus::Succeeded);

        let events = harness.events.events();
        for spec in graph.tasks() {
            let started = index_of(&events, &spec.id, TaskStatus::Running).unwrap();
            for dependency in &spec.dependencies {
                let finished = index_of(&events, dependency, TaskStatus::Succeeded).unwrap();
                assert!(
                    finished < started,
                    "{} started before {} succeeded",
                    spec.id,
                    dependency
                );
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_use_exactly_max_attempts() {
    let policy = RetryPolicy::default()
        .with_max_attempts(3)
        .with_base_delay_ms(100)
        .with_multiplier(2.0)
        .with_max_delay_ms(1_000);
    let harness = Harness::new(SchedulerConfig::default().with_default_retry_policy(policy));
    let timed = Arc::new(TimedFailure::default());
    harness.register("flaky", timed.clone());

    let record = harness.run(vec![task("a", "flaky")]).await;

    assert_task_status(&record, "a", TaskStatus::Failed);
    assert_task_attempts(&record, "a", 3);
    assert_eq!(record.metrics.total_attempts, 3);
    let last_error = record.task("a").unwrap().last_error.clone().unwrap();
    assert_eq!(last_error.kind, FailureKind::Retryable);

    let calls = timed.calls.lock().clone();
    assert_eq!(calls.len(), 3);
    let first_wait = calls[1] - calls[0];
    let second_wait = calls[2] - calls[1];
    assert!(first_wait >= Duration::from_millis(100));
    assert!(second_wait >= Duration::from_millis(200));
    assert!(second_wait <= Duration::from_millis(1_000));

    // Retries stay inside one RUNNING span.
    assert_eq!(harness.events.events_of_type("task.running").len(), 1);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
    let harness = Harness::standard();
    let scripted = Arc::new(
        ScriptedCapability::new()
            .then_err(InvokeError::timeout("slow replica"))
            .then_ok(json!({"rows": 10})),
    );
    harness.register("sql", scripted.clone());

    let record = harness.run(vec![task("a", "sql")]).await;

    assert_task_status(&record, "a", TaskStatus::Succeeded);
    assert_task_attempts(&record, "a", 2);
    assert!(record.task("a").unwrap().last_error.is_none());
    assert_eq!(scripted.calls(), 2);
}

#[tokio::test]
async fn test_open_breaker_fails_fast_without_invoking() {
    let config = SchedulerConfig::default()
        .with_max_parallel_tasks(1)
        .with_default_retry_policy(RetryPolicy::no_retry())
        .with_circuit_breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(2)
                .with_open_duration_ms(60_000),
        );
    let harness = Harness::new(config);
    let failing = Arc::new(ScriptedCapability::always_failing(InvokeError::transient(
        "connection refused by postgres://app:s3cret@db:5432/sales",
    )));
    harness.register("db", failing.clone());

    let record = harness
        .run(vec![task("a", "db"), task("b", "db"), task("c", "db")])
        .await;

    assert_all_tasks(&record, &["a", "b", "c"], TaskStatus::Failed);
    assert_eq!(failing.calls(), 2);

    let rejected: Vec<_> = record
        .tasks
        .values()
        .filter(|state| {
            state.last_error.as_ref().map(|e| e.kind) == Some(FailureKind::CircuitOpen)
        })
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].attempt_count, 0);

    for state in record.tasks.values() {
        let message = &state.last_error.as_ref().unwrap().message;
        assert!(!message.contains("s3cret"), "unsanitized: {message}");
    }

    let metrics = harness.scheduler.breaker_metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].resource, "db-resource");
    assert_eq!(metrics[0].state, CircuitState::Open);
    assert_eq!(metrics[0].total_rejections, 1);
}

#[tokio::test]
async fn test_breaker_is_shared_across_runs() {
    let config = SchedulerConfig::default()
        .with_default_retry_policy(RetryPolicy::no_retry())
        .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
    let harness = Harness::new(config);
    let failing = Arc::new(ScriptedCapability::always_failing(InvokeError::transient("down")));
    harness.register("api", failing.clone());

    let first = harness.run(vec![task("call", "api")]).await;
    let second = harness.run(vec![task("call", "api")]).await;

    assert_run_status(&first, RunStatus::Failed);
    assert_run_status(&second, RunStatus::Failed);
    assert_eq!(failing.calls(), 1);
    let kind = second.task("call").unwrap().last_error.as_ref().unwrap().kind;
    assert_eq!(kind, FailureKind::CircuitOpen);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_a_timeout_failure() {
    let harness = Harness::new(
        SchedulerConfig::default()
            .with_default_retry_policy(RetryPolicy::no_retry())
            .with_task_timeout_ms(50),
    );
    harness.register("slow", Arc::new(SlowCapability::new(Duration::from_secs(10))));

    let record = harness.run(vec![task("a", "slow")]).await;

    assert_task_status(&record, "a", TaskStatus::Failed);
    let last_error = record.task("a").unwrap().last_error.clone().unwrap();
    assert_eq!(last_error.category, Some(ErrorCategory::Timeout));
    assert_eq!(last_error.kind, FailureKind::Retryable);
}

#[tokio::test]
async fn test_terminal_record_rejects_every_transition() {
    let harness = Harness::standard();
    harness.register("ok", Arc::new(CountingCapability::new(json!(null))));

    let mut record = harness.run(vec![task("a", "ok"), task("b", "ok").depends_on("a")]).await;
    assert_run_status(&record, RunStatus::Succeeded);

    for to in [
        TaskStatus::Ready,
        TaskStatus::Running,
        TaskStatus::Failed,
        TaskStatus::Skipped,
        TaskStatus::Cancelled,
    ] {
        assert!(record.transition("a", to, None).is_err());
    }
    assert!(record.finish(RunStatus::Failed, None).is_err());
    assert!(!harness.scheduler.cancel(&record.execution_id, "late").unwrap());
}

#[tokio::test]
async fn test_empty_graph_completes_immediately() {
    let harness = Harness::standard();

    let record = harness.run(Vec::new()).await;

    assert_run_status(&record, RunStatus::Succeeded);
    assert_eq!(record.metrics.total_tasks, 0);
    assert!(record.ended_at.is_some());
    assert_eq!(harness.events.len(), 2);
}

#[tokio::test]
async fn test_invalid_graph_is_rejected_before_execution() {
    let harness = Harness::standard();

    let err = harness
        .scheduler
        .submit_tasks(
            "cyclic",
            [
                task("a", "ok").depends_on("c"),
                task("b", "ok").depends_on("a"),
                task("c", "ok").depends_on("b"),
            ],
        )
        .unwrap_err();

    assert!(matches!(
        err,
        TaskflowError::Validation(ValidationError::CycleDetected(_))
    ));
    assert!(harness.scheduler.executions().is_empty());
}

#[tokio::test]
async fn test_unknown_execution_is_reported() {
    let harness = Harness::standard();

    assert!(matches!(
        harness.scheduler.get_status("nope"),
        Err(TaskflowError::ExecutionNotFound(_))
    ));
    assert!(matches!(
        harness.scheduler.cancel("nope", "x"),
        Err(TaskflowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_runs_share_one_graph() {
    let harness = Harness::standard();
    let counting = Arc::new(CountingCapability::new(json!(null)).with_delay(Duration::from_millis(5)));
    harness.register("work", counting.clone());
    let graph = Arc::new(
        TaskGraph::from_tasks("shared", [task("a", "work"), task("b", "work").depends_on("a")]).unwrap(),
    );

    let first = harness.scheduler.submit_graph(Arc::clone(&graph)).unwrap();
    let second = harness.scheduler.submit_graph(Arc::clone(&graph)).unwrap();
    assert_ne!(first, second);

    let (a, b) = tokio::join!(harness.scheduler.wait(&first), harness.scheduler.wait(&second));
    assert_run_status(&a.unwrap(), RunStatus::Succeeded);
    assert_run_status(&b.unwrap(), RunStatus::Succeeded);
    assert_eq!(counting.calls(), 4);

    let listed = harness.scheduler.executions();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.status == RunStatus::Succeeded));

    assert!(harness.scheduler.forget(&first));
    assert_eq!(harness.scheduler.executions().len(), 1);
}

#[tokio::test]
async fn test_every_transition_reaches_the_sink() {
    let mut sink = MockEventSink::new();
    sink.expect_emit()
        .withf(|event| event.is_run_event())
        .times(2)
        .return_const(());
    sink.expect_emit()
        .withf(|event| event.task_id.as_deref() == Some("only"))
        .times(3)
        .return_const(());

    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("ok", Arc::new(CountingCapability::new(json!(null))));
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Arc::new(LocalExecutor::new(registry, 1)),
    )
    .with_event_sink(Arc::new(sink));

    let graph = Arc::new(TaskGraph::from_tasks("one", [task("only", "ok")]).unwrap());
    let record = scheduler.run(graph).await.unwrap();

    assert_run_status(&record, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_execution_store_keeps_ordered_history() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry.register("ok", Arc::new(CountingCapability::new(json!(null))));
    let store = Arc::new(InMemoryExecutionStore::new());
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Arc::new(LocalExecutor::new(registry, 2)),
    )
    .with_event_sink(store.clone());

    let graph = Arc::new(
        TaskGraph::from_tasks("stored", [task("a", "ok"), task("b", "ok").depends_on("a")]).unwrap(),
    );
    let record = scheduler.run(graph).await.unwrap();

    let history = store.history(&record.execution_id);
    assert_eq!(history.len(), 8);
    assert_eq!(history[0].event_type(), "run.running");
    assert_eq!(history[7].event_type(), "run.succeeded");
    assert_eq!(
        store.last_run_status(&record.execution_id),
        Some(StatusValue::Run(RunStatus::Succeeded))
    );
}

#[tokio::test]
async fn test_distributed_executor_runs_graph_through_queue() {
    let registry = Arc::new(CapabilityRegistry::new());
    let counting = Arc::new(CountingCapability::new(json!("remote")));
    registry.register("remote", counting.clone());

    let (queue, receiver) = InMemoryWorkQueue::new(16);
    let executor = Arc::new(DistributedExecutor::new(Arc::new(queue)));
    let _worker = QueueWorker::new(receiver, Arc::clone(&registry), Arc::clone(&executor))
        .with_concurrency(4)
        .spawn();
    let scheduler = Scheduler::new(SchedulerConfig::default(), executor);

    let graph = Arc::new(
        TaskGraph::from_tasks(
            "remote",
            [
                task("a", "remote"),
                task("b", "remote").depends_on("a"),
                task("c", "remote").depends_on("a"),
                task("d", "remote").with_dependencies(["b", "c"]),
            ],
        )
        .unwrap(),
    );
    let record = scheduler.run(graph).await.unwrap();

    assert_run_status(&record, RunStatus::Succeeded);
    assert_all_tasks(&record, &["a", "b", "c", "d"], TaskStatus::Succeeded);
    assert_eq!(counting.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_remote_attempt_leaves_nothing_pending() {
    // Keep the receiver alive with no worker so deliveries are never answered.
    let (queue, _receiver) = InMemoryWorkQueue::new(16);
    let queue = Arc::new(queue);
    let executor = Arc::new(DistributedExecutor::new(queue.clone()));
    let scheduler = Scheduler::new(
        SchedulerConfig::default()
            .with_default_retry_policy(RetryPolicy::no_retry())
            .with_task_timeout_ms(50),
        executor.clone(),
    );

    let graph = Arc::new(TaskGraph::from_tasks("remote", [task("a", "remote")]).unwrap());
    let record = scheduler.run(graph).await.unwrap();

    assert_task_status(&record, "a", TaskStatus::Failed);
    let last_error = record.task("a").unwrap().last_error.clone().unwrap();
    assert_eq!(last_error.category, Some(ErrorCategory::Timeout));
    assert_eq!(executor.pending_count(), 0);
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn test_missing_capability_fails_task_fatally() {
    let harness = Harness::standard();

    let record = harness.run(vec![task("a", "unregistered")]).await;

    assert_task_status(&record, "a", TaskStatus::Failed);
    let last_error = record.task("a").unwrap().last_error.clone().unwrap();
    assert_eq!(last_error.kind, FailureKind::Fatal);
    assert_eq!(last_error.category, Some(ErrorCategory::Programming));
}
