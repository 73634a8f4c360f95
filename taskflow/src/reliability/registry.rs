//! Process-wide lookup of circuit breakers by resource identity.

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of breakers, one per resource identity.
///
/// Breakers are created lazily on first lookup and live until the registry is
/// dropped. Lookups for different resources never contend on a shared lock.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Creates a registry whose breakers use `defaults`.
    #[must_use]
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: DashMap::new(),
        }
    }

    /// Returns the breaker for `resource`, creating it on first use.
    #[must_use]
    pub fn get_or_create(&self, resource: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(resource) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                debug!(resource = %resource, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(resource, self.defaults.clone()))
            })
            .clone()
    }

    /// Installs a breaker with a custom config, replacing any existing one.
    pub fn configure(&self, resource: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(resource, config));
        self.breakers.insert(resource.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Returns the breaker for `resource` if it exists.
    #[must_use]
    pub fn get(&self, resource: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(resource).map(|b| Arc::clone(b.value()))
    }

    /// Number of breakers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Metrics for every breaker, sorted by resource.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CircuitBreakerMetrics> {
        let mut all: Vec<CircuitBreakerMetrics> =
            self.breakers.iter().map(|b| b.value().metrics()).collect();
        all.sort_by(|a, b| a.resource.cmp(&b.resource));
        all
    }

    /// Resets one breaker. Returns false if the resource is unknown.
    pub fn reset(&self, resource: &str) -> bool {
        match self.get(resource) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Resets every breaker.
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}
