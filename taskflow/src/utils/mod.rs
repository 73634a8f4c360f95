//! Utility functions for sanitization, identifiers and timestamps.

mod ids;
mod sanitize;
pub mod timestamps;

pub use ids::{generate_delivery_id, generate_execution_id, idempotency_key};
pub use sanitize::{
    is_sensitive_field, redact_json, sanitize_message, sanitize_url, REDACTED, SENSITIVE_FIELDS,
};
pub use timestamps::{elapsed_ms, iso_timestamp, now_utc, Timestamp};
