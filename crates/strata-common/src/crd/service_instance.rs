//! ServiceInstance Custom Resource Definition
//!
//! A ServiceInstance represents a provisioned service on the remote platform
//! inside a workspace. Provisioning is asynchronous on the remote side; the
//! reconciler drives a decision table over the remote lifecycle state.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceState};

/// Reference to a key in a secret contributing a parameter fragment
///
/// The referenced value must be a JSON object; its top-level keys are merged
/// with the inline parameters and must not overlap any other source.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParametersFromSource {
    /// Name of the secret in the resource's namespace
    pub name: String,
    /// Key within the secret holding a JSON object
    pub key: String,
}

/// Specification for a ServiceInstance
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "ServiceInstance",
    plural = "serviceinstances",
    shortname = "si",
    status = "ServiceInstanceStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    /// Name of the Workspace (same namespace) or ClusterWorkspace this
    /// instance is provisioned in
    pub workspace: String,

    /// Service offering name, resolved together with `servicePlanName`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_offering_name: Option<String>,

    /// Service plan name within the offering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_plan_name: Option<String>,

    /// Direct remote plan id; takes precedence over offering/plan names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_plan_id: Option<String>,

    /// Inline provisioning parameters (JSON object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// Secret-held parameter fragments merged with the inline parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters_from: Vec<ParametersFromSource>,

    /// Tags attached to the remote instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Remote instance name; defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
}

impl ServiceInstanceSpec {
    /// The name the remote instance should carry
    pub fn remote_name<'a>(&'a self, resource_name: &'a str) -> &'a str {
        self.external_name.as_deref().unwrap_or(resource_name)
    }
}

/// Status for a ServiceInstance
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceStatus {
    /// Last generation fully processed; -1 until the first full pass
    #[serde(default = "default_observed_generation")]
    pub observed_generation: i64,

    /// Timestamp of the last completed reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<DateTime<Utc>>,

    /// Timestamp of the last mutating remote call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<DateTime<Utc>>,

    /// Remote id of the instance, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Digest over generation and merged parameters
    ///
    /// Dependent ServiceBindings compare this to detect that the instance
    /// changed underneath them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_instance_digest: Option<String>,

    /// Conditions (currently exactly one: Ready)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Human-readable summary state
    #[serde(default)]
    pub state: ResourceState,

    /// Consecutive retryable failures since the last Ready state
    #[serde(default)]
    pub retry_counter: i64,

    /// Retry budget from the max-retries annotation, echoed for visibility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
}

fn default_observed_generation() -> i64 {
    -1
}

impl Default for ServiceInstanceStatus {
    fn default() -> Self {
        Self {
            observed_generation: -1,
            last_reconciled_at: None,
            last_modified_at: None,
            instance_id: None,
            service_instance_digest: None,
            conditions: Vec::new(),
            state: ResourceState::default(),
            retry_counter: 0,
            max_retries: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_name_defaults_to_resource_name() {
        let spec = ServiceInstanceSpec {
            workspace: "dev-space".to_string(),
            service_offering_name: Some("xsuaa".to_string()),
            service_plan_name: Some("application".to_string()),
            service_plan_id: None,
            parameters: None,
            parameters_from: Vec::new(),
            tags: Vec::new(),
            external_name: None,
        };
        assert_eq!(spec.remote_name("my-instance"), "my-instance");
    }

    #[test]
    fn test_remote_name_honors_external_name() {
        let spec = ServiceInstanceSpec {
            workspace: "dev-space".to_string(),
            service_offering_name: None,
            service_plan_name: None,
            service_plan_id: Some("plan-1".to_string()),
            parameters: None,
            parameters_from: Vec::new(),
            tags: Vec::new(),
            external_name: Some("legacy-name".to_string()),
        };
        assert_eq!(spec.remote_name("my-instance"), "legacy-name");
    }

    #[test]
    fn test_status_default_retry_counter_is_zero() {
        let status = ServiceInstanceStatus::default();
        assert_eq!(status.retry_counter, 0);
        assert_eq!(status.observed_generation, -1);
        assert!(status.max_retries.is_none());
    }
}
