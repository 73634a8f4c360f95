//! Event sink trait and implementations.

use crate::core::TransitionEvent;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives every accepted transition of every execution record.
///
/// Called synchronously by the scheduler after the record lock is released;
/// implementations must not block and must never panic.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Emits one transition event.
    fn emit(&self, event: &TransitionEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &TransitionEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &TransitionEvent) {
        let task_id = event.task_id.as_deref().unwrap_or("-");
        let error = event.error.as_ref().map(ToString::to_string);
        if self.level == Level::DEBUG {
            debug!(
                execution_id = %event.execution_id,
                task_id,
                from = %event.old_status,
                to = %event.new_status,
                attempt = event.attempt,
                error = error.as_deref(),
                "Event: {}", event.event_type()
            );
        } else {
            info!(
                execution_id = %event.execution_id,
                task_id,
                from = %event.old_status,
                to = %event.new_status,
                attempt = event.attempt,
                error = error.as_deref(),
                "Event: {}", event.event_type()
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<TransitionEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose dotted type starts with `type_prefix`
    /// (e.g. `task.` or `run.failed`).
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<TransitionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the events of one task, in emission order.
    #[must_use]
    pub fn events_for_task(&self, task_id: &str) -> Vec<TransitionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &TransitionEvent) {
        self.events.write().push(event.clone());
    }
}
