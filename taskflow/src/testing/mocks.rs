//! Mock capabilities for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::capability::{Capability, CapabilityHandle, HealthCheckResult};
use crate::errors::InvokeError;

/// A capability that replays a scripted sequence of results.
///
/// Each call pops the next scripted result; once the script is exhausted the
/// fallback (default `Ok(null)`) is returned for every further call.
#[derive(Debug)]
pub struct ScriptedCapability {
    script: Mutex<VecDeque<Result<Value, InvokeError>>>,
    fallback: Mutex<Result<Value, InvokeError>>,
    health: Mutex<HealthCheckResult>,
    calls: AtomicUsize,
}

impl Default for ScriptedCapability {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(Value::Null)),
            health: Mutex::new(HealthCheckResult::healthy()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedCapability {
    /// Creates a capability that always succeeds with `null`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a capability that always fails with `error`.
    #[must_use]
    pub fn always_failing(error: InvokeError) -> Self {
        Self::new().with_fallback(Err(error))
    }

    /// Appends a successful result to the script.
    #[must_use]
    pub fn then_ok(self, value: Value) -> Self {
        self.script.lock().push_back(Ok(value));
        self
    }

    /// Appends a failure to the script.
    #[must_use]
    pub fn then_err(self, error: InvokeError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Sets the result returned once the script is exhausted.
    #[must_use]
    pub fn with_fallback(self, result: Result<Value, InvokeError>) -> Self {
        *self.fallback.lock() = result;
        self
    }

    /// Sets the health check result.
    pub fn set_health(&self, health: HealthCheckResult) {
        *self.health.lock() = health;
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn invoke(
        &self,
        _handle: &CapabilityHandle,
        _token: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }

    async fn health_check(&self) -> HealthCheckResult {
        self.health.lock().clone()
    }
}

/// A capability that takes a fixed time and honors cancellation.
#[derive(Debug)]
pub struct SlowCapability {
    delay: Duration,
    output: Value,
    started: AtomicUsize,
    completed: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl SlowCapability {
    /// Creates a capability that sleeps for `delay` then returns `null`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            output: Value::Null,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the returned value.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    /// Returns how many invocations started.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns how many invocations ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns how many times `cancel` was called.
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for SlowCapability {
    async fn invoke(
        &self,
        _handle: &CapabilityHandle,
        token: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            () = tokio::time::sleep(self.delay) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                Ok(self.output.clone())
            }
            () = token.cancelled() => {
                Err(InvokeError::cancelled(token.reason().unwrap_or_default()))
            }
        }
    }

    async fn cancel(&self, _handle: &CapabilityHandle) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A capability that counts calls and tracks peak concurrency.
#[derive(Debug)]
pub struct CountingCapability {
    output: Value,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    resources: Mutex<Vec<String>>,
}

impl CountingCapability {
    /// Creates a capability returning `output` immediately.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            resources: Mutex::new(Vec::new()),
        }
    }

    /// Holds each call open for `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the highest number of simultaneous invocations observed.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns the resource ids seen, in call order.
    #[must_use]
    pub fn resources(&self) -> Vec<String> {
        self.resources.lock().clone()
    }
}

#[async_trait]
impl Capability for CountingCapability {
    async fn invoke(
        &self,
        handle: &CapabilityHandle,
        _token: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.resources.lock().push(handle.resource_id.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_replays_then_falls_back() {
        let cap = ScriptedCapability::new()
            .then_err(InvokeError::transient("blip"))
            .then_ok(json!(1))
            .with_fallback(Ok(json!("steady")));
        let handle = CapabilityHandle::new("scripted", "r");
        let token = CancellationToken::new();

        assert_eq!(
            cap.invoke(&handle, &token).await.unwrap_err().category,
            ErrorCategory::Transient
        );
        assert_eq!(cap.invoke(&handle, &token).await.unwrap(), json!(1));
        assert_eq!(cap.invoke(&handle, &token).await.unwrap(), json!("steady"));
        assert_eq!(cap.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_capability_completes() {
        let cap = SlowCapability::new(Duration::from_secs(5)).with_output(json!("late"));
        let value = cap
            .invoke(&CapabilityHandle::new("slow", "r"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(value, json!("late"));
        assert_eq!(cap.started(), 1);
        assert_eq!(cap.completed(), 1);
    }

    #[tokio::test]
    async fn test_counting_records_resources() {
        let cap = CountingCapability::new(json!(true));
        let token = CancellationToken::new();
        cap.invoke(&CapabilityHandle::new("c", "one"), &token).await.unwrap();
        cap.invoke(&CapabilityHandle::new("c", "two"), &token).await.unwrap();

        assert_eq!(cap.calls(), 2);
        assert_eq!(cap.peak_concurrency(), 1);
        assert_eq!(cap.resources(), vec!["one".to_string(), "two".to_string()]);
    }
}
