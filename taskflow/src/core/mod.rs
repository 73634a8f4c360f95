//! Core types shared by every layer of the orchestrator.
//!
//! This module provides:
//! - [`TaskStatus`] and [`RunStatus`] with their legal transition tables
//! - [`LastError`] and [`FailureKind`] for sanitized failure detail
//! - [`TransitionEvent`] emitted for every accepted transition

mod event;
mod failure;
mod status;

pub use event::{StatusValue, TransitionEvent};
pub use failure::{FailureKind, LastError};
pub use status::{RunStatus, TaskStatus};
