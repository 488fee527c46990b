//! Parameter digest computation
//!
//! The digest fingerprints a resource's desired state: the spec generation
//! plus the fully merged parameters. It is persisted in status and written
//! onto the remote record, so a later pass (or a dependent binding) can
//! detect staleness without fetching parameters again.
//!
//! serde_json's default map representation is key-ordered, so serializing
//! the parameter object yields a canonical form.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the hex digest over a generation and merged parameters
pub fn parameter_digest(generation: i64, parameters: Option<&Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(generation.to_le_bytes());
    if let Some(params) = parameters {
        // Value cannot fail to serialize
        hasher.update(params.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_is_stable() {
        let params = json!({"size": "large", "replicas": 3});
        let a = parameter_digest(4, Some(&params));
        let b = parameter_digest(4, Some(&params));
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(parameter_digest(1, Some(&a)), parameter_digest(1, Some(&b)));
    }

    #[test]
    fn test_digest_changes_with_generation() {
        let params = json!({"size": "large"});
        assert_ne!(
            parameter_digest(1, Some(&params)),
            parameter_digest(2, Some(&params))
        );
    }

    #[test]
    fn test_digest_changes_with_any_key() {
        let a = json!({"size": "large"});
        let b = json!({"size": "small"});
        let c = json!({"size": "large", "extra": true});
        assert_ne!(parameter_digest(1, Some(&a)), parameter_digest(1, Some(&b)));
        assert_ne!(parameter_digest(1, Some(&a)), parameter_digest(1, Some(&c)));
    }

    #[test]
    fn test_digest_without_parameters_differs_from_empty_object() {
        let empty = json!({});
        assert_ne!(parameter_digest(1, None), parameter_digest(1, Some(&empty)));
    }
}
