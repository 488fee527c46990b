//! ServiceBinding Custom Resource Definition
//!
//! A ServiceBinding represents a credential binding to a ServiceInstance.
//! On Ready, the reconciler materializes the remote credentials into a
//! target secret owned by the binding resource.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::service_instance::ParametersFromSource;
use super::types::{Condition, ResourceState};

/// Specification for a ServiceBinding
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "ServiceBinding",
    plural = "servicebindings",
    shortname = "sb",
    status = "ServiceBindingStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingSpec {
    /// Name of the ServiceInstance (same namespace) this binding binds
    pub service_instance: String,

    /// Inline binding parameters (JSON object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// Secret-held parameter fragments merged with the inline parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters_from: Vec<ParametersFromSource>,

    /// Name of the target secret receiving the credentials
    pub secret_name: String,

    /// When set, the whole credentials object is stored as one JSON blob
    /// under this key instead of flattened key-by-key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Remote binding name; defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
}

impl ServiceBindingSpec {
    /// The name the remote binding should carry
    pub fn remote_name<'a>(&'a self, resource_name: &'a str) -> &'a str {
        self.external_name.as_deref().unwrap_or(resource_name)
    }
}

/// Status for a ServiceBinding
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingStatus {
    /// Last generation fully processed; -1 until the first full pass
    #[serde(default = "default_observed_generation")]
    pub observed_generation: i64,

    /// Timestamp of the last completed reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<DateTime<Utc>>,

    /// Timestamp of the last mutating remote call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<DateTime<Utc>>,

    /// Remote id of the binding, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<String>,

    /// Digest over generation and merged parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_binding_digest: Option<String>,

    /// Digest of the backing instance at the last successful apply
    ///
    /// Compared against the instance's current digest to detect that the
    /// instance changed underneath the binding (rotate-on-instance-change).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_instance_digest: Option<String>,

    /// Name of the secret last written, so a rename can clean up its
    /// predecessor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Conditions (currently exactly one: Ready)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Human-readable summary state
    #[serde(default)]
    pub state: ResourceState,
}

fn default_observed_generation() -> i64 {
    -1
}

impl Default for ServiceBindingStatus {
    fn default() -> Self {
        Self {
            observed_generation: -1,
            last_reconciled_at: None,
            last_modified_at: None,
            binding_id: None,
            service_binding_digest: None,
            observed_instance_digest: None,
            secret_name: None,
            conditions: Vec::new(),
            state: ResourceState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_name_defaults_to_resource_name() {
        let spec = ServiceBindingSpec {
            service_instance: "my-instance".to_string(),
            parameters: None,
            parameters_from: Vec::new(),
            secret_name: "my-creds".to_string(),
            secret_key: None,
            external_name: None,
        };
        assert_eq!(spec.remote_name("my-binding"), "my-binding");
    }

    #[test]
    fn test_status_defaults() {
        let status = ServiceBindingStatus::default();
        assert_eq!(status.observed_generation, -1);
        assert!(status.secret_name.is_none());
        assert_eq!(status.state, ResourceState::Processing);
    }
}
