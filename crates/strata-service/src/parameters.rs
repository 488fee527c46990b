//! Resolution of parameter fragments from spec and referenced secrets

use k8s_openapi::api::core::v1::Secret;
use serde_json::Value;
use strata_common::params::{merge_parameters, ParameterSource};
use strata_common::Error;

/// Extract a JSON-object fragment from a secret key
pub(crate) fn fragment_from_secret(
    secret: &Secret,
    name: &str,
    namespace: &str,
    key: &str,
) -> Result<Value, Error> {
    let data = secret
        .data
        .as_ref()
        .ok_or_else(|| Error::secret(name, namespace, "has no data"))?;
    let bytes = data
        .get(key)
        .ok_or_else(|| Error::secret(name, namespace, format!("missing key {key}")))?;
    serde_json::from_slice(&bytes.0)
        .map_err(|e| Error::secret(name, namespace, format!("key {key} is not valid JSON: {e}")))
}

/// Merge inline spec parameters with secret-held fragments
///
/// `fragments` pairs an origin description with the fragment value; the
/// origins appear verbatim in duplicate-key error messages.
pub(crate) fn merge_with_fragments(
    inline: Option<&Value>,
    fragments: &[(String, Value)],
) -> Result<Option<Value>, Error> {
    let mut sources = Vec::with_capacity(fragments.len() + 1);
    if let Some(value) = inline {
        sources.push(ParameterSource {
            origin: "spec.parameters".to_string(),
            value,
        });
    }
    for (origin, value) in fragments {
        sources.push(ParameterSource {
            origin: origin.clone(),
            value,
        });
    }
    merge_parameters(&sources)
}
