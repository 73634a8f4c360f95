//! The seam between the core and external connectors.
//!
//! The core stores a [`CapabilityHandle`] per task and resolves it through a
//! [`CapabilityRegistry`] keyed by type name. It never imports concrete
//! connector types.

mod handle;
mod health;
mod registry;

pub use handle::CapabilityHandle;
pub use health::{HealthCheckResult, HealthStatus};
pub use registry::CapabilityRegistry;

use crate::cancellation::CancellationToken;
use crate::errors::InvokeError;
use async_trait::async_trait;
use serde_json::Value;

/// An external unit of work the executor can invoke.
///
/// Implementations must be idempotent per [`CapabilityHandle`] and attempt:
/// the distributed executor delivers at least once.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Performs the work described by `handle`.
    ///
    /// Long-running implementations should race their I/O against
    /// `token.cancelled()` and return an [`InvokeError`] with category
    /// `Cancelled` when it fires.
    async fn invoke(
        &self,
        handle: &CapabilityHandle,
        token: &CancellationToken,
    ) -> Result<Value, InvokeError>;

    /// Asks the capability to abandon in-flight work for `handle`.
    async fn cancel(&self, _handle: &CapabilityHandle) {}

    /// Reports the health of the backing resource.
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult::unknown()
    }
}
