//! Reliability layer: retry policy and per-resource circuit breakers.
//!
//! This module provides:
//! - [`RetryPolicy`] and [`retry_with_backoff`] with cancellable backoff
//! - [`CircuitBreaker`] guarding one external resource
//! - [`CircuitBreakerRegistry`] creating breakers lazily per resource id

mod circuit_breaker;
mod registry;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, StateChange,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{retry_with_backoff, AttemptError, RetryError, RetryPolicy};
