//! Fingerprint - canonical content hashing
//!
//! Produces SHA-256 digests of serializable values that are stable across
//! processes: object keys are sorted before hashing, so map iteration order
//! never changes the result.
//!
//! Used for the distribution-statistics fingerprint that consumers persist
//! for change detection, and for the configuration hash logged at startup.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Fingerprint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Compute deterministic SHA256 hash of a value
///
/// Uses canonical JSON serialization with sorted keys to ensure
/// deterministic hashing regardless of map iteration order.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, FingerprintError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(value)?;

    // Recursively sort all object keys for canonical representation
    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
