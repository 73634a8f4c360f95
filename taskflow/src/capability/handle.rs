//! Opaque reference to external work.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque handle naming the capability that performs a task's work.
///
/// The core never interprets `params`; it only uses `type_name` to resolve an
/// implementation and `resource_id` to pick a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityHandle {
    /// Registry key of the capability implementation (e.g. `sql`).
    pub type_name: String,
    /// Identity of the external resource (e.g. `postgres:sales`).
    pub resource_id: String,
    /// Parameters forwarded verbatim to the capability.
    #[serde(default)]
    pub params: Value,
}

impl CapabilityHandle {
    /// Creates a handle with no parameters.
    #[must_use]
    pub fn new(type_name: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            resource_id: resource_id.into(),
            params: Value::Null,
        }
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handle_defaults_params_when_missing() {
        let handle: CapabilityHandle =
            serde_json::from_str(r#"{"type_name":"sql","resource_id":"pg:sales"}"#).unwrap();

        assert_eq!(handle, CapabilityHandle::new("sql", "pg:sales"));
        assert!(handle.params.is_null());
    }

    #[test]
    fn test_with_params() {
        let handle = CapabilityHandle::new("rest", "api:billing")
            .with_params(json!({"path": "/invoices"}));
        assert_eq!(handle.params["path"], "/invoices");
    }
}
