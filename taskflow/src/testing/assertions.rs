//! Test assertions for execution records.

use crate::context::ExecutionRecord;
use crate::core::{RunStatus, TaskStatus};

/// Asserts that a task ended in the expected status.
pub fn assert_task_status(record: &ExecutionRecord, task_id: &str, expected: TaskStatus) {
    let actual = record.task_status(task_id);
    assert_eq!(
        actual,
        Some(expected),
        "Expected task '{}' to be {:?}, got {:?}",
        task_id,
        expected,
        actual
    );
}

/// Asserts that the run ended in the expected status.
pub fn assert_run_status(record: &ExecutionRecord, expected: RunStatus) {
    assert_eq!(
        record.status, expected,
        "Expected run {} to be {:?}, got {:?} (error: {:?})",
        record.execution_id, expected, record.status, record.error
    );
}

/// Asserts that every listed task has the expected status.
pub fn assert_all_tasks(record: &ExecutionRecord, task_ids: &[&str], expected: TaskStatus) {
    for task_id in task_ids {
        assert_task_status(record, task_id, expected);
    }
}

/// Asserts the attempt count of a task.
pub fn assert_task_attempts(record: &ExecutionRecord, task_id: &str, expected: u32) {
    let actual = record.task(task_id).map(|state| state.attempt_count);
    assert_eq!(
        actual,
        Some(expected),
        "Expected task '{}' to have {} attempts, got {:?}",
        task_id,
        expected,
        actual
    );
}
