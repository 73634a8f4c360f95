//! Testing utilities for taskflow graphs.
//!
//! This module provides:
//! - Mock capabilities (scripted, slow, counting)
//! - Assertions over execution records

mod assertions;
mod mocks;

pub use assertions::{assert_all_tasks, assert_run_status, assert_task_attempts, assert_task_status};
pub use mocks::{CountingCapability, ScriptedCapability, SlowCapability};
