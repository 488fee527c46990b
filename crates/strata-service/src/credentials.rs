//! Shaping of remote binding credentials into secret data
//!
//! Two layouts: flat (each top-level credential key becomes a secret key)
//! or a single JSON blob under the spec's `secretKey`. The with-metadata
//! annotation additionally stores descriptive fields and a `.metadata`
//! entry describing which keys are credentials and which are metadata.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use serde_json::{json, Value};
use strata_common::Error;

/// Secret key holding the field descriptions when metadata is requested
pub const METADATA_KEY: &str = ".metadata";

/// Descriptive fields stored alongside the credentials
#[derive(Clone, Debug)]
pub struct BindingDescriptor {
    /// Local binding resource name
    pub binding_name: String,
    /// Remote binding id
    pub binding_id: String,
    /// Local instance resource name
    pub instance_name: String,
    /// Remote instance id
    pub instance_id: String,
}

impl BindingDescriptor {
    fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("binding_name", &self.binding_name),
            ("binding_guid", &self.binding_id),
            ("instance_name", &self.instance_name),
            ("instance_guid", &self.instance_id),
        ]
    }
}

/// Build the secret data map for a binding's credentials
///
/// Without `secret_key` the credentials must be a JSON object; string
/// values are stored raw and anything else is stored as serialized JSON.
pub fn secret_payload(
    credentials: &Value,
    secret_key: Option<&str>,
    descriptor: Option<&BindingDescriptor>,
) -> Result<BTreeMap<String, ByteString>, Error> {
    let mut data = BTreeMap::new();
    let mut credential_keys = Vec::new();

    match secret_key {
        Some(key) => {
            let blob = serde_json::to_vec(credentials)
                .map_err(|e| Error::serialization(e.to_string()))?;
            data.insert(key.to_string(), ByteString(blob));
            credential_keys.push(json!({ "name": key, "format": "json" }));
        }
        None => {
            let object = credentials.as_object().ok_or_else(|| {
                Error::config("credentials are not a JSON object and no secretKey is set")
            })?;
            for (key, value) in object {
                let (bytes, format) = match value {
                    Value::String(s) => (s.clone().into_bytes(), "text"),
                    other => (
                        serde_json::to_vec(other)
                            .map_err(|e| Error::serialization(e.to_string()))?,
                        "json",
                    ),
                };
                data.insert(key.clone(), ByteString(bytes));
                credential_keys.push(json!({ "name": key, "format": format }));
            }
        }
    }

    if let Some(descriptor) = descriptor {
        let mut metadata_keys = Vec::new();
        for (key, value) in descriptor.fields() {
            data.insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
            metadata_keys.push(json!({ "name": key, "format": "text" }));
        }
        let metadata = json!({
            "credentialProperties": credential_keys,
            "metaDataProperties": metadata_keys,
        });
        data.insert(
            METADATA_KEY.to_string(),
            ByteString(
                serde_json::to_vec(&metadata).map_err(|e| Error::serialization(e.to_string()))?,
            ),
        );
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credentials() -> Value {
        json!({
            "uri": "https://service.example.com",
            "port": 5432,
            "auth": { "user": "svc", "pass": "pw" }
        })
    }

    fn descriptor() -> BindingDescriptor {
        BindingDescriptor {
            binding_name: "my-binding".to_string(),
            binding_id: "b-1".to_string(),
            instance_name: "my-instance".to_string(),
            instance_id: "i-1".to_string(),
        }
    }

    #[test]
    fn test_flat_layout_stores_strings_raw() {
        let data = secret_payload(&sample_credentials(), None, None).expect("payload");
        assert_eq!(data["uri"].0, b"https://service.example.com");
        assert_eq!(data["port"].0, b"5432");
        let auth: Value = serde_json::from_slice(&data["auth"].0).expect("json");
        assert_eq!(auth["user"], "svc");
        assert!(!data.contains_key(METADATA_KEY));
    }

    #[test]
    fn test_blob_layout_stores_single_key() {
        let data =
            secret_payload(&sample_credentials(), Some("credentials"), None).expect("payload");
        assert_eq!(data.len(), 1);
        let blob: Value = serde_json::from_slice(&data["credentials"].0).expect("json");
        assert_eq!(blob, sample_credentials());
    }

    #[test]
    fn test_non_object_without_secret_key_is_config_error() {
        let err = secret_payload(&json!("just a token"), None, None).expect_err("must fail");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_non_object_with_secret_key_is_fine() {
        let data = secret_payload(&json!("just a token"), Some("token"), None).expect("payload");
        assert_eq!(data["token"].0, b"\"just a token\"");
    }

    #[test]
    fn test_metadata_describes_all_keys() {
        let data =
            secret_payload(&sample_credentials(), None, Some(&descriptor())).expect("payload");
        assert_eq!(data["binding_guid"].0, b"b-1");
        assert_eq!(data["instance_name"].0, b"my-instance");

        let metadata: Value = serde_json::from_slice(&data[METADATA_KEY].0).expect("json");
        let credential_names: Vec<&str> = metadata["credentialProperties"]
            .as_array()
            .expect("array")
            .iter()
            .map(|p| p["name"].as_str().expect("name"))
            .collect();
        assert!(credential_names.contains(&"uri"));
        assert!(credential_names.contains(&"auth"));
        assert_eq!(
            metadata["metaDataProperties"].as_array().expect("array").len(),
            4
        );
    }
}
