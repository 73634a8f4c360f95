//! Execution context: the mutable record of one run.
//!
//! This module provides:
//! - [`ExecutionRecord`], the single-writer run record with its transition API
//! - [`TaskState`] per task
//! - [`ExecutionMetrics`] aggregate counters

mod record;

pub use record::{ExecutionMetrics, ExecutionRecord, TaskState};
