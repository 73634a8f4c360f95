//! In-memory work queue and its consumer.
//!
//! Stands in for a message broker in tests and single-node deployments. The
//! queue half is handed to a [`DistributedExecutor`]; the receiving half is
//! driven by a [`QueueWorker`] that runs capabilities and reports results.

use super::distributed::{DistributedExecutor, ResultNotification, TaskDescriptor, TaskOutcome, WorkQueue};
use crate::cancellation::CancellationToken;
use crate::capability::CapabilityRegistry;
use crate::errors::{ErrorCategory, InvokeError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type InFlight = Arc<DashMap<String, Arc<CancellationToken>>>;

/// Bounded in-process work queue.
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    tx: mpsc::Sender<TaskDescriptor>,
    in_flight: InFlight,
}

/// Receiving half of an [`InMemoryWorkQueue`].
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<TaskDescriptor>,
    in_flight: InFlight,
}

impl InMemoryWorkQueue {
    /// Creates a queue holding at most `capacity` undelivered descriptors.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let in_flight: InFlight = Arc::new(DashMap::new());
        (
            Self {
                tx,
                in_flight: Arc::clone(&in_flight),
            },
            QueueReceiver { rx, in_flight },
        )
    }

    /// Returns the number of deliveries enqueued and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), InvokeError> {
        let delivery_id = descriptor.delivery_id.clone();
        self.in_flight
            .insert(delivery_id.clone(), Arc::new(CancellationToken::new()));

        if self.tx.send(descriptor).await.is_err() {
            self.in_flight.remove(&delivery_id);
            return Err(InvokeError::new(
                ErrorCategory::Unavailable,
                "Work queue has no consumer",
            ));
        }
        Ok(())
    }

    async fn revoke(&self, delivery_id: &str) {
        if let Some((_, token)) = self.in_flight.remove(delivery_id) {
            token.cancel("delivery revoked");
        }
    }
}

/// Consumes an [`InMemoryWorkQueue`] and reports results to the executor.
pub struct QueueWorker {
    receiver: QueueReceiver,
    registry: Arc<CapabilityRegistry>,
    executor: Arc<DistributedExecutor>,
    concurrency: usize,
}

impl QueueWorker {
    /// Creates a worker running one delivery at a time.
    #[must_use]
    pub fn new(
        receiver: QueueReceiver,
        registry: Arc<CapabilityRegistry>,
        executor: Arc<DistributedExecutor>,
    ) -> Self {
        Self {
            receiver,
            registry,
            executor,
            concurrency: 1,
        }
    }

    /// Sets how many deliveries run concurrently.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Spawns the consume loop. It ends when every queue sender is dropped.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let Self {
            receiver: QueueReceiver { mut rx, in_flight },
            registry,
            executor,
            concurrency,
        } = self;
        let slots = Arc::new(Semaphore::new(concurrency));

        while let Some(descriptor) = rx.recv().await {
            let Some(token) = in_flight
                .get(&descriptor.delivery_id)
                .map(|entry| Arc::clone(entry.value())) else {
                debug!(delivery_id = %descriptor.delivery_id, "Skipping revoked delivery");
                continue;
            };
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };

            let registry = Arc::clone(&registry);
            let executor = Arc::clone(&executor);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                let _permit = permit;
                let result = deliver(&registry, &descriptor, &token).await;
                in_flight.remove(&descriptor.delivery_id);
                let notification =
                    ResultNotification::new(descriptor.delivery_id.clone(), TaskOutcome::from_result(result));
                if !executor.complete(notification) {
                    debug!(
                        delivery_id = %descriptor.delivery_id,
                        task_id = %descriptor.task_id,
                        "Result no longer awaited"
                    );
                }
            });
        }
    }
}

async fn deliver(
    registry: &CapabilityRegistry,
    descriptor: &TaskDescriptor,
    token: &CancellationToken,
) -> Result<serde_json::Value, InvokeError> {
    let handle = &descriptor.capability;
    let Some(capability) = registry.get(&handle.type_name) else {
        warn!(
            delivery_id = %descriptor.delivery_id,
            capability = %handle.type_name,
            "No capability registered for delivery"
        );
        return Err(InvokeError::new(
            ErrorCategory::Programming,
            format!("No capability registered for type '{}'", handle.type_name),
        ));
    };

    tokio::select! {
        result = capability.invoke(handle, token) => result,
        () = token.cancelled() => {
            capability.cancel(handle).await;
            Err(InvokeError::cancelled("delivery revoked"))
        }
    }
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
