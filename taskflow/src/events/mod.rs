//! Transition event delivery.
//!
//! The scheduler emits one [`TransitionEvent`](crate::core::TransitionEvent)
//! per accepted task or run transition to a single [`EventSink`]. Sinks are
//! injected; there is no process-wide sink.

mod queued;
mod sink;
mod store;

pub use queued::{QueueMetrics, QueueMetricsSnapshot, QueuedEventSink};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
pub use store::InMemoryExecutionStore;

#[cfg(test)]
pub use sink::MockEventSink;

use std::sync::Arc;

/// Fans one event out to several sinks, in order.
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &crate::core::TransitionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

impl std::fmt::Debug for FanoutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
