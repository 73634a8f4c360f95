//! In-memory execution history.

use super::EventSink;
use crate::core::{StatusValue, TransitionEvent};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Records every transition per execution, in emission order.
///
/// Stands in for an external metadata store: the scheduler emits, this keeps
/// the ordered history. Nothing here survives a process restart.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    histories: RwLock<HashMap<String, Vec<TransitionEvent>>>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ordered history of one execution (empty if unknown).
    #[must_use]
    pub fn history(&self, execution_id: &str) -> Vec<TransitionEvent> {
        self.histories
            .read()
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the ids of every recorded execution, sorted.
    #[must_use]
    pub fn executions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.histories.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the last run-level status recorded for an execution.
    #[must_use]
    pub fn last_run_status(&self, execution_id: &str) -> Option<StatusValue> {
        self.histories
            .read()
            .get(execution_id)?
            .iter()
            .rev()
            .find(|event| event.is_run_event())
            .map(|event| event.new_status)
    }

    /// Drops the history of one execution. Returns true if it existed.
    pub fn remove(&self, execution_id: &str) -> bool {
        self.histories.write().remove(execution_id).is_some()
    }
}

impl EventSink for InMemoryExecutionStore {
    fn emit(&self, event: &TransitionEvent) {
        self.histories
            .write()
            .entry(event.execution_id.clone())
            .or_default()
            .push(event.clone());
    }
}
