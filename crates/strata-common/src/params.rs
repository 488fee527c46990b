//! Parameter merging across inline and secret-held sources
//!
//! Parameters for instances and bindings are a merge of an inline JSON
//! object and zero or more secret fragments. Top-level keys must be
//! disjoint across all sources; overlap is a hard configuration error,
//! never last-write-wins.

use serde_json::{Map, Value};

use crate::Error;

/// A named parameter source, used in duplicate-key error messages
pub struct ParameterSource<'a> {
    /// Where the fragment came from (e.g., "spec.parameters",
    /// "secret team-a/extra key config")
    pub origin: String,
    /// The fragment itself; must be a JSON object
    pub value: &'a Value,
}

/// Merge parameter fragments into a single JSON object
///
/// Returns None when no source contributes anything. Errors when a source
/// is not a JSON object or when two sources share a top-level key.
pub fn merge_parameters(sources: &[ParameterSource<'_>]) -> Result<Option<Value>, Error> {
    if sources.is_empty() {
        return Ok(None);
    }

    let mut merged = Map::new();
    for source in sources {
        let object = source.value.as_object().ok_or_else(|| {
            Error::config(format!(
                "parameter source {} is not a JSON object",
                source.origin
            ))
        })?;

        for (key, value) in object {
            if merged.contains_key(key) {
                return Err(Error::config(format!(
                    "duplicate parameter key {:?} introduced by {}",
                    key, source.origin
                )));
            }
            merged.insert(key.clone(), value.clone());
        }
    }

    if merged.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(merged)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_sources_yields_none() {
        assert!(merge_parameters(&[]).unwrap().is_none());
    }

    #[test]
    fn test_merges_disjoint_sources() {
        let inline = json!({"plan_features": {"ha": true}});
        let fragment = json!({"admin_password": "s3cret"});
        let merged = merge_parameters(&[
            ParameterSource {
                origin: "spec.parameters".to_string(),
                value: &inline,
            },
            ParameterSource {
                origin: "secret team-a/extra key config".to_string(),
                value: &fragment,
            },
        ])
        .unwrap()
        .unwrap();

        assert_eq!(
            merged,
            json!({"plan_features": {"ha": true}, "admin_password": "s3cret"})
        );
    }

    #[test]
    fn test_duplicate_top_level_key_is_hard_error() {
        let inline = json!({"size": "large"});
        let fragment = json!({"size": "small"});
        let err = merge_parameters(&[
            ParameterSource {
                origin: "spec.parameters".to_string(),
                value: &inline,
            },
            ParameterSource {
                origin: "secret team-a/extra key config".to_string(),
                value: &fragment,
            },
        ])
        .unwrap_err();

        assert!(err.to_string().contains("duplicate parameter key"));
        assert!(err.to_string().contains("size"));
    }

    #[test]
    fn test_nested_keys_may_collide() {
        // Only top-level keys must be disjoint.
        let a = json!({"db": {"size": 1}});
        let b = json!({"cache": {"size": 1}});
        let merged = merge_parameters(&[
            ParameterSource {
                origin: "a".to_string(),
                value: &a,
            },
            ParameterSource {
                origin: "b".to_string(),
                value: &b,
            },
        ])
        .unwrap();
        assert!(merged.is_some());
    }

    #[test]
    fn test_non_object_source_is_error() {
        let list = json!([1, 2, 3]);
        let err = merge_parameters(&[ParameterSource {
            origin: "spec.parameters".to_string(),
            value: &list,
        }])
        .unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn test_empty_objects_yield_none() {
        let empty = json!({});
        let merged = merge_parameters(&[ParameterSource {
            origin: "spec.parameters".to_string(),
            value: &empty,
        }])
        .unwrap();
        assert!(merged.is_none());
    }
}
