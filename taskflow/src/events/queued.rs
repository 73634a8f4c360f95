//! Bounded, non-blocking forwarding sink.

use super::EventSink;
use crate::core::TransitionEvent;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

type DropCallback = Arc<dyn Fn(&TransitionEvent) + Send + Sync>;

/// Counters for a [`QueuedEventSink`].
#[derive(Debug, Default)]
pub struct QueueMetrics {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueMetricsSnapshot {
    /// Events accepted into the queue.
    pub emitted: u64,
    /// Events dropped because the queue was full or closed.
    pub dropped: u64,
    /// Dropped share in percent.
    pub drop_rate_percent: f64,
}

impl QueueMetrics {
    fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of emitted events.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Returns the number of dropped events.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the drop rate as a percentage.
    #[must_use]
    pub fn drop_rate(&self) -> f64 {
        let emitted = self.emitted();
        let dropped = self.dropped();
        let total = emitted + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            emitted: self.emitted(),
            dropped: self.dropped(),
            drop_rate_percent: (self.drop_rate() * 100.0).round() / 100.0,
        }
    }
}

/// Forwards events to a downstream sink from a background task.
///
/// `emit` never blocks: when the bounded queue is full the event is dropped,
/// counted, and reported to the optional drop callback. Use this in front of
/// a slow downstream (a persistence adapter, a network exporter) so the
/// scheduler is never stalled by it.
pub struct QueuedEventSink {
    tx: Mutex<Option<mpsc::Sender<TransitionEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<QueueMetrics>,
    on_drop: RwLock<Option<DropCallback>>,
}

impl QueuedEventSink {
    /// Spawns the forwarding worker. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(downstream: Arc<dyn EventSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<TransitionEvent>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                downstream.emit(&event);
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            metrics: Arc::new(QueueMetrics::default()),
            on_drop: RwLock::new(None),
        }
    }

    /// Sets the callback invoked for every dropped event.
    pub fn set_on_drop<F>(&self, callback: F)
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        *self.on_drop.write() = Some(Arc::new(callback));
    }

    /// Returns the queue counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Closes the queue and waits until every accepted event was forwarded.
    ///
    /// Events emitted afterwards are counted as dropped.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(error = %err, "Event forwarding worker ended abnormally");
            }
        }
    }

    fn dropped(&self, event: &TransitionEvent) {
        self.metrics.record_drop();
        warn!(
            execution_id = %event.execution_id,
            event_type = %event.event_type(),
            dropped = self.metrics.dropped(),
            "Event queue full, dropping event"
        );
        let callback = self.on_drop.read().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

impl EventSink for QueuedEventSink {
    fn emit(&self, event: &TransitionEvent) {
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.try_send(event.clone()).is_ok(),
            None => false,
        };
        if sent {
            self.metrics.record_emit();
        } else {
            self.dropped(event);
        }
    }
}

impl std::fmt::Debug for QueuedEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedEventSink")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
