//! In-process executor backed by a bounded worker pool.

use super::{attempt_timeout, ExecutorContract, TaskInvocation};
use crate::capability::CapabilityRegistry;
use crate::errors::{ErrorCategory, InvokeError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs capabilities on the current tokio runtime.
///
/// At most `max_workers` invocations run at once across every execution that
/// shares this executor; further submissions wait for a slot (cancellably).
#[derive(Debug)]
pub struct LocalExecutor {
    registry: Arc<CapabilityRegistry>,
    workers: Arc<Semaphore>,
    max_workers: usize,
}

impl LocalExecutor {
    /// Creates an executor resolving capabilities through `registry`.
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            registry,
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Returns the worker pool size.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Returns the number of idle worker slots.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }
}

#[async_trait]
impl ExecutorContract for LocalExecutor {
    async fn submit(&self, invocation: TaskInvocation) -> Result<Value, InvokeError> {
        let TaskInvocation {
            execution_id,
            task_id,
            attempt,
            capability: handle,
            token,
            timeout,
        } = invocation;

        let capability = self.registry.get(&handle.type_name).ok_or_else(|| {
            InvokeError::new(
                ErrorCategory::Programming,
                format!("No capability registered for type '{}'", handle.type_name),
            )
        })?;

        let _permit = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => permit.map_err(|_| {
                InvokeError::new(ErrorCategory::Unavailable, "Worker pool is closed")
            })?,
            () = token.cancelled() => {
                return Err(InvokeError::cancelled(cancel_reason(&token)));
            }
        };

        debug!(
            execution_id = %execution_id,
            task_id = %task_id,
            attempt,
            capability = %handle.type_name,
            resource = %handle.resource_id,
            "Invoking capability"
        );

        let invoke = async {
            tokio::select! {
                result = capability.invoke(&handle, &token) => result,
                () = token.cancelled() => {
                    capability.cancel(&handle).await;
                    Err(InvokeError::cancelled(cancel_reason(&token)))
                }
            }
        };
        let Some(limit) = timeout else {
            return invoke.await;
        };
        match tokio::time::timeout(limit, invoke).await {
            Ok(result) => result,
            Err(_) => {
                capability.cancel(&handle).await;
                Err(attempt_timeout(limit))
            }
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

pub(super) fn cancel_reason(token: &crate::cancellation::CancellationToken) -> String {
    token.reason().unwrap_or_else(|| "cancelled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::capability::CapabilityHandle;
    use crate::testing::{CountingCapability, SlowCapability};
    use serde_json::json;
    use std::time::Duration;

    fn invocation(type_name: &str, token: Arc<CancellationToken>) -> TaskInvocation {
        TaskInvocation::new(
            "exec-1",
            "load",
            1,
            CapabilityHandle::new(type_name, "res-1"),
            token,
        )
    }

    #[tokio::test]
    async fn test_unknown_capability_is_programming_error() {
        let executor = LocalExecutor::new(Arc::new(CapabilityRegistry::new()), 2);
        let err = executor
            .submit(invocation("missing", Arc::new(CancellationToken::new())))
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Programming);
        assert!(err.message.contains("missing"));
    }

    #[tokio::test]
    async fn test_invokes_registered_capability() {
        let registry = Arc::new(CapabilityRegistry::new());
        let counting = Arc::new(CountingCapability::new(json!({"rows": 3})));
        registry.register("sql", counting.clone());
        let executor = LocalExecutor::new(registry, 1);

        let value = executor
            .submit(invocation("sql", Arc::new(CancellationToken::new())))
            .await
            .unwrap();

        assert_eq!(value, json!({"rows": 3}));
        assert_eq!(counting.calls(), 1);
        assert_eq!(executor.available_workers(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_invocation() {
        let registry = Arc::new(CapabilityRegistry::new());
        let slow = Arc::new(SlowCapability::new(Duration::from_secs(60)));
        registry.register("slow", slow.clone());
        let executor = Arc::new(LocalExecutor::new(registry, 1));
        let token = Arc::new(CancellationToken::new());

        let handle = {
            let executor = Arc::clone(&executor);
            let token = Arc::clone(&token);
            tokio::spawn(async move { executor.submit(invocation("slow", token)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel("user request");

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.category, ErrorCategory::Cancelled);
        assert_eq!(err.message, "user request");
        assert_eq!(slow.cancel_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_capability() {
        let registry = Arc::new(CapabilityRegistry::new());
        let slow = Arc::new(SlowCapability::new(Duration::from_secs(10)));
        registry.register("slow", slow.clone());
        let executor = LocalExecutor::new(registry, 1);

        let err = executor
            .submit(
                invocation("slow", Arc::new(CancellationToken::new()))
                    .with_timeout(Some(Duration::from_millis(50))),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Timeout);
        assert_eq!(slow.cancel_calls(), 1);
        assert_eq!(slow.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_for_a_worker_does_not_count_against_timeout() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register("busy", Arc::new(SlowCapability::new(Duration::from_millis(200))));
        let counting = Arc::new(CountingCapability::new(json!("done")));
        registry.register("quick", counting.clone());
        let executor = Arc::new(LocalExecutor::new(registry, 1));

        let busy = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .submit(invocation("busy", Arc::new(CancellationToken::new())))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(executor.available_workers(), 0);

        let value = executor
            .submit(
                invocation("quick", Arc::new(CancellationToken::new()))
                    .with_timeout(Some(Duration::from_millis(100))),
            )
            .await
            .unwrap();

        assert_eq!(value, json!("done"));
        assert_eq!(counting.calls(), 1);
        busy.await.unwrap().unwrap();
    }
}
