//! # Taskflow
//!
//! The orchestration core of a data pipeline platform: validated task DAGs,
//! a dependency-resolving scheduler with bounded parallel dispatch, and a
//! reliability layer of retries and per-resource circuit breakers.
//!
//! Taskflow provides:
//!
//! - **Graph model**: immutable task graphs with cycle detection and
//!   topological layers
//! - **Scheduling**: readiness by dependency counting, failure propagation
//!   to dependents, cooperative cancellation
//! - **Reliability**: classified retries with cancellable backoff, circuit
//!   breakers shared across runs
//! - **Executors**: one contract, served in-process or through a work queue
//! - **Observability**: a transition event per state change, sanitized
//!   error detail, structured `tracing` logs
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskflow::prelude::*;
//!
//! # async fn demo() -> Result<(), TaskflowError> {
//! let registry = Arc::new(CapabilityRegistry::new());
//! // registry.register("sql", Arc::new(SqlCapability::new(pool)));
//! let executor = Arc::new(LocalExecutor::new(Arc::clone(&registry), 8));
//! let scheduler = Scheduler::new(SchedulerConfig::default(), executor);
//!
//! let graph = GraphBuilder::new("nightly")
//!     .task(TaskSpec::new("extract", CapabilityHandle::new("sql", "pg:sales")))
//!     .task(
//!         TaskSpec::new("load", CapabilityHandle::new("sql", "pg:warehouse"))
//!             .depends_on("extract"),
//!     )
//!     .build()?;
//!
//! let record = scheduler.run(Arc::new(graph)).await?;
//! println!("run {} ended {}", record.execution_id, record.status);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod capability;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod observability;
pub mod reliability;
pub mod scheduler;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::capability::{
        Capability, CapabilityHandle, CapabilityRegistry, HealthCheckResult, HealthStatus,
    };
    pub use crate::context::{ExecutionMetrics, ExecutionRecord, TaskState};
    pub use crate::core::{FailureKind, LastError, RunStatus, TaskStatus, TransitionEvent};
    pub use crate::errors::{
        CircuitOpenError, ErrorCategory, InvalidStateTransition, InvokeError, TaskError,
        TaskflowError, ValidationError,
    };
    pub use crate::events::{EventSink, InMemoryExecutionStore, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{DistributedExecutor, ExecutorContract, LocalExecutor};
    pub use crate::graph::{GraphBuilder, TaskGraph, TaskSpec};
    pub use crate::reliability::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy};
    pub use crate::scheduler::{Scheduler, SchedulerConfig};
    pub use crate::utils::{sanitize_message, Timestamp};
}
