//! Identifier generation.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a time-ordered execution id (UUID v7).
#[must_use]
pub fn generate_execution_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generates a random delivery id (UUID v4).
#[must_use]
pub fn generate_delivery_id() -> String {
    Uuid::new_v4().to_string()
}

/// Derives a stable idempotency key for one attempt of one task.
///
/// The key is the hex SHA-256 of `execution_id/task_id/attempt`, so a
/// redelivered descriptor carries the same key as the original.
#[must_use]
pub fn idempotency_key(execution_id: &str, task_id: &str, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(execution_id.as_bytes());
    hasher.update(b"/");
    hasher.update(task_id.as_bytes());
    hasher.update(b"/");
    hasher.update(attempt.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_are_v7_and_unique() {
        let a = generate_execution_id();
        let b = generate_execution_id();

        assert_ne!(a, b);
        let parsed = Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let first = idempotency_key("exec-1", "load", 1);
        let again = idempotency_key("exec-1", "load", 1);
        let next_attempt = idempotency_key("exec-1", "load", 2);

        assert_eq!(first, again);
        assert_ne!(first, next_attempt);
        assert_eq!(first.len(), 64);
    }
}
