//! Work-queue backed executor.
//!
//! A submitted attempt is serialized into a [`TaskDescriptor`] and handed to a
//! [`WorkQueue`]. Some consumer later reports a [`ResultNotification`] through
//! [`DistributedExecutor::complete`], which wakes the waiting submission.
//! Delivery is at least once: duplicate or late notifications are ignored,
//! and capabilities are expected to dedupe on
//! [`TaskDescriptor::idempotency_key`].

use super::local::cancel_reason;
use super::{attempt_timeout, ExecutorContract, TaskInvocation};
use crate::capability::CapabilityHandle;
use crate::errors::{ErrorCategory, InvokeError};
use crate::utils::{generate_delivery_id, idempotency_key, now_utc, sanitize_message, Timestamp};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default time to wait for a result notification (5 minutes).
pub const DEFAULT_RESULT_TIMEOUT_MS: u64 = 300_000;

/// Wire form of one task attempt placed on a work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique per enqueue; correlates the result notification.
    pub delivery_id: String,
    /// Stable per (execution, task, attempt) across redeliveries.
    pub idempotency_key: String,
    /// The execution id.
    pub execution_id: String,
    /// The task id.
    pub task_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// What to invoke.
    pub capability: CapabilityHandle,
    /// When the descriptor was created.
    pub enqueued_at: Timestamp,
}

impl TaskDescriptor {
    /// Builds the descriptor for an invocation.
    #[must_use]
    pub fn from_invocation(invocation: &TaskInvocation) -> Self {
        Self {
            delivery_id: generate_delivery_id(),
            idempotency_key: idempotency_key(
                &invocation.execution_id,
                &invocation.task_id,
                invocation.attempt,
            ),
            execution_id: invocation.execution_id.clone(),
            task_id: invocation.task_id.clone(),
            attempt: invocation.attempt,
            capability: invocation.capability.clone(),
            enqueued_at: now_utc(),
        }
    }

    /// Serializes to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses from JSON.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// The result of a delivered attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The capability returned a value.
    Succeeded {
        /// The opaque output.
        output: Value,
    },
    /// The capability failed.
    Failed {
        /// Failure category reported by the worker.
        category: ErrorCategory,
        /// Sanitized failure message.
        message: String,
    },
}

impl TaskOutcome {
    /// Converts an invocation result, sanitizing any failure message.
    #[must_use]
    pub fn from_result(result: Result<Value, InvokeError>) -> Self {
        match result {
            Ok(output) => Self::Succeeded { output },
            Err(err) => Self::Failed {
                category: err.category,
                message: sanitize_message(&err.message),
            },
        }
    }

    fn into_result(self) -> Result<Value, InvokeError> {
        match self {
            Self::Succeeded { output } => Ok(output),
            Self::Failed { category, message } => Err(InvokeError::new(category, message)),
        }
    }
}

/// Result notification sent back by a queue consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNotification {
    /// The delivery this result belongs to.
    pub delivery_id: String,
    /// What happened.
    pub outcome: TaskOutcome,
}

impl ResultNotification {
    /// Creates a notification.
    #[must_use]
    pub fn new(delivery_id: impl Into<String>, outcome: TaskOutcome) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            outcome,
        }
    }
}

/// A queue that accepts task descriptors for remote execution.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Places a descriptor on the queue.
    async fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), InvokeError>;

    /// Best-effort withdrawal of a delivery that is no longer awaited.
    async fn revoke(&self, _delivery_id: &str) {}
}

/// Executor that dispatches attempts through a [`WorkQueue`].
pub struct DistributedExecutor {
    queue: Arc<dyn WorkQueue>,
    pending: DashMap<String, oneshot::Sender<TaskOutcome>>,
    result_timeout_ms: u64,
}

impl DistributedExecutor {
    /// Creates an executor publishing to `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            queue,
            pending: DashMap::new(),
            result_timeout_ms: DEFAULT_RESULT_TIMEOUT_MS,
        }
    }

    /// Sets how long a submission waits for its result notification.
    #[must_use]
    pub fn with_result_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.result_timeout_ms = timeout_ms;
        self
    }

    /// Returns the number of submissions awaiting a result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Delivers a result notification to the waiting submission.
    ///
    /// Returns false for unknown, duplicate or late notifications.
    pub fn complete(&self, notification: ResultNotification) -> bool {
        let Some((_, sender)) = self.pending.remove(&notification.delivery_id) else {
            debug!(
                delivery_id = %notification.delivery_id,
                "Ignoring result for unknown or completed delivery"
            );
            return false;
        };
        sender.send(notification.outcome).is_ok()
    }

    async fn abandon(&self, delivery_id: &str) {
        self.pending.remove(delivery_id);
        self.queue.revoke(delivery_id).await;
    }
}

/// Registration of an awaited delivery. If the submission is dropped before
/// it settles, the entry is removed and the delivery revoked in the background.
struct PendingDelivery<'a> {
    executor: &'a DistributedExecutor,
    delivery_id: String,
    armed: bool,
}

impl<'a> PendingDelivery<'a> {
    fn register(
        executor: &'a DistributedExecutor,
        delivery_id: String,
        sender: oneshot::Sender<TaskOutcome>,
    ) -> Self {
        executor.pending.insert(delivery_id.clone(), sender);
        Self {
            executor,
            delivery_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingDelivery<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.executor.pending.remove(&self.delivery_id);
        debug!(delivery_id = %self.delivery_id, "Submission dropped, revoking delivery");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let queue = Arc::clone(&self.executor.queue);
            let delivery_id = self.delivery_id.clone();
            runtime.spawn(async move { queue.revoke(&delivery_id).await });
        }
    }
}

#[async_trait]
impl ExecutorContract for DistributedExecutor {
    async fn submit(&self, invocation: TaskInvocation) -> Result<Value, InvokeError> {
        if invocation.token.is_cancelled() {
            return Err(InvokeError::cancelled(cancel_reason(&invocation.token)));
        }

        let descriptor = TaskDescriptor::from_invocation(&invocation);
        let (tx, rx) = oneshot::channel();
        let mut pending = PendingDelivery::register(self, descriptor.delivery_id.clone(), tx);
        let delivery_id = pending.delivery_id.clone();

        if let Err(err) = self.queue.enqueue(descriptor).await {
            self.pending.remove(&delivery_id);
            pending.disarm();
            return Err(err);
        }

        debug!(
            execution_id = %invocation.execution_id,
            task_id = %invocation.task_id,
            attempt = invocation.attempt,
            delivery_id = %delivery_id,
            "Enqueued task descriptor"
        );

        let result_wait = Duration::from_millis(self.result_timeout_ms);
        let attempt_limit = invocation.timeout.filter(|limit| *limit < result_wait);
        let wait = attempt_limit.unwrap_or(result_wait);

        let result = tokio::select! {
            outcome = rx => match outcome {
                Ok(outcome) => outcome.into_result(),
                Err(_) => Err(InvokeError::new(
                    ErrorCategory::Unavailable,
                    "Result channel closed before a notification arrived",
                )),
            },
            () = tokio::time::sleep(wait) => {
                warn!(
                    execution_id = %invocation.execution_id,
                    task_id = %invocation.task_id,
                    delivery_id = %delivery_id,
                    timeout_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "No result notification before timeout"
                );
                self.abandon(&delivery_id).await;
                Err(attempt_limit.map_or_else(
                    || InvokeError::timeout(format!("No result within {}ms", self.result_timeout_ms)),
                    attempt_timeout,
                ))
            }
            () = invocation.token.cancelled() => {
                self.abandon(&delivery_id).await;
                Err(InvokeError::cancelled(cancel_reason(&invocation.token)))
            }
        };
        pending.disarm();
        result
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}

impl std::fmt::Debug for DistributedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedExecutor")
            .field("pending", &self.pending.len())
            .field("result_timeout_ms", &self.result_timeout_ms)
            .finish_non_exhaustive()
    }
}
