//! Cooperative cancellation.
//!
//! One [`CancellationToken`] exists per run; it is handed to every capability
//! invocation and every backoff wait of that run.

mod token;

pub use token::{CancelCallback, CancellationToken};
