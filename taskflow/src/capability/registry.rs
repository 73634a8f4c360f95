//! Registry resolving capability type names to implementations.

use super::{Capability, HealthCheckResult, HealthStatus};
use crate::utils::sanitize_message;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Registry of capability implementations keyed by type name.
///
/// Owned by whoever wires the executor; there is no process-wide instance.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Arc<dyn Capability>>>,
    last_health: RwLock<BTreeMap<String, HealthCheckResult>>,
}

impl CapabilityRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation, replacing any previous one for the name.
    pub fn register(&self, type_name: impl Into<String>, capability: Arc<dyn Capability>) {
        let type_name = type_name.into();
        debug!(type_name = %type_name, "Registered capability");
        self.capabilities.write().insert(type_name, capability);
    }

    /// Removes an implementation. Returns true if it was registered.
    pub fn unregister(&self, type_name: &str) -> bool {
        self.last_health.write().remove(type_name);
        self.capabilities.write().remove(type_name).is_some()
    }

    /// Resolves an implementation by type name.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.read().get(type_name).cloned()
    }

    /// Returns true if the type name is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.capabilities.read().contains_key(type_name)
    }

    /// Lists registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs every capability's health check concurrently.
    ///
    /// Messages are sanitized and latency is measured here. The results are
    /// also remembered for [`unhealthy`](Self::unhealthy).
    pub async fn check_all(&self) -> BTreeMap<String, HealthCheckResult> {
        let snapshot: Vec<(String, Arc<dyn Capability>)> = self
            .capabilities
            .read()
            .iter()
            .map(|(name, cap)| (name.clone(), Arc::clone(cap)))
            .collect();

        let checks = snapshot.into_iter().map(|(name, cap)| async move {
            let started = Instant::now();
            let mut result = cap.health_check().await;
            result.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            result.message = result.message.as_deref().map(sanitize_message);

            if !result.status.is_operational() && result.status != HealthStatus::Unknown {
                warn!(
                    type_name = %name,
                    status = %result.status,
                    message = result.message.as_deref().unwrap_or(""),
                    "Capability health check failed"
                );
            }
            (name, result)
        });

        let results: BTreeMap<String, HealthCheckResult> = join_all(checks).await.into_iter().collect();
        self.last_health.write().clone_from(&results);
        results
    }

    /// Type names whose most recent check reported `Unhealthy`.
    #[must_use]
    pub fn unhealthy(&self) -> Vec<String> {
        self.last_health
            .read()
            .iter()
            .filter(|(_, result)| result.status == HealthStatus::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("type_names", &self.type_names())
            .finish_non_exhaustive()
    }
}
