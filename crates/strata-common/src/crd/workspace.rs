//! Workspace and ClusterWorkspace Custom Resource Definitions
//!
//! Both kinds represent an organizational container on the remote platform
//! in which service instances are provisioned. They share one status type
//! and one reconciler; the [`RemoteWorkspace`] trait abstracts over the two
//! concrete kinds so the state machine is written once.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceState};
use crate::DEFAULT_WORKSPACE_READY_SECS;

/// Specification for a namespaced Workspace
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    shortname = "wsp",
    status = "WorkspaceStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Name of the remote organization the workspace lives in (immutable)
    pub organization_name: String,

    /// Name of the credentials secret in the resource's namespace
    pub credentials_secret: String,

    /// Remote id of a pre-existing workspace
    ///
    /// When set, the reconciler never creates or updates the remote
    /// workspace; it only health-checks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Polling interval in seconds while the workspace is Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_interval_seconds: Option<u64>,
}

/// Specification for a cluster-scoped ClusterWorkspace
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "ClusterWorkspace",
    plural = "clusterworkspaces",
    shortname = "cwsp",
    status = "WorkspaceStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWorkspaceSpec {
    /// Name of the remote organization the workspace lives in (immutable)
    pub organization_name: String,

    /// Name of the credentials secret
    pub credentials_secret: String,

    /// Namespace of the credentials secret (cluster-scoped resources cannot
    /// default to their own namespace)
    pub credentials_secret_namespace: String,

    /// Remote id of a pre-existing workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Polling interval in seconds while the workspace is Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_interval_seconds: Option<u64>,
}

/// Status shared by Workspace and ClusterWorkspace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// Last generation fully processed; -1 until the first full pass
    #[serde(default = "default_observed_generation")]
    pub observed_generation: i64,

    /// Timestamp of the last completed reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<DateTime<Utc>>,

    /// Timestamp of the last mutating remote call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<DateTime<Utc>>,

    /// Remote id of the workspace, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,

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

impl Default for WorkspaceStatus {
    fn default() -> Self {
        Self {
            observed_generation: -1,
            last_reconciled_at: None,
            last_modified_at: None,
            space_id: None,
            conditions: Vec::new(),
            state: ResourceState::default(),
        }
    }
}

/// Which concrete workspace kind a reconciliation is operating on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceKind {
    /// Namespaced Workspace
    Namespaced,
    /// Cluster-scoped ClusterWorkspace
    Cluster,
}

impl std::fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Namespaced => write!(f, "Workspace"),
            Self::Cluster => write!(f, "ClusterWorkspace"),
        }
    }
}

/// Abstraction over Workspace and ClusterWorkspace
///
/// Exposes exactly what the shared reconciler needs: identity, spec fields,
/// status, and metadata accessors. Implemented by both concrete kinds.
pub trait RemoteWorkspace: Send + Sync {
    /// The concrete kind
    fn kind(&self) -> WorkspaceKind;

    /// Resource name
    fn name(&self) -> String;

    /// Resource namespace (None for ClusterWorkspace)
    fn namespace(&self) -> Option<String>;

    /// Stable UID, used as the owner token on remote records
    fn uid(&self) -> Option<String>;

    /// Current metadata generation
    fn generation(&self) -> i64;

    /// Resource annotations
    fn annotations(&self) -> &BTreeMap<String, String>;

    /// Resource finalizers
    fn finalizers(&self) -> &[String];

    /// Whether a deletion timestamp is set
    fn is_deleting(&self) -> bool;

    /// Remote organization name
    fn organization_name(&self) -> &str;

    /// Credentials secret name and namespace
    fn credentials_secret(&self) -> (String, Option<String>);

    /// Pre-existing remote workspace id, if the spec pins one
    fn workspace_id(&self) -> Option<&str>;

    /// Ready polling interval
    fn ready_interval(&self) -> Duration;

    /// Current status, if any
    fn status(&self) -> Option<&WorkspaceStatus>;
}

impl RemoteWorkspace for Workspace {
    fn kind(&self) -> WorkspaceKind {
        WorkspaceKind::Namespaced
    }

    fn name(&self) -> String {
        self.name_any()
    }

    fn namespace(&self) -> Option<String> {
        ResourceExt::namespace(self)
    }

    fn uid(&self) -> Option<String> {
        ResourceExt::uid(self)
    }

    fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    fn annotations(&self) -> &BTreeMap<String, String> {
        ResourceExt::annotations(self)
    }

    fn finalizers(&self) -> &[String] {
        ResourceExt::finalizers(self)
    }

    fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    fn organization_name(&self) -> &str {
        &self.spec.organization_name
    }

    fn credentials_secret(&self) -> (String, Option<String>) {
        (
            self.spec.credentials_secret.clone(),
            ResourceExt::namespace(self),
        )
    }

    fn workspace_id(&self) -> Option<&str> {
        self.spec.workspace_id.as_deref()
    }

    fn ready_interval(&self) -> Duration {
        Duration::from_secs(
            self.spec
                .ready_interval_seconds
                .unwrap_or(DEFAULT_WORKSPACE_READY_SECS),
        )
    }

    fn status(&self) -> Option<&WorkspaceStatus> {
        self.status.as_ref()
    }
}

impl RemoteWorkspace for ClusterWorkspace {
    fn kind(&self) -> WorkspaceKind {
        WorkspaceKind::Cluster
    }

    fn name(&self) -> String {
        self.name_any()
    }

    fn namespace(&self) -> Option<String> {
        None
    }

    fn uid(&self) -> Option<String> {
        ResourceExt::uid(self)
    }

    fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    fn annotations(&self) -> &BTreeMap<String, String> {
        ResourceExt::annotations(self)
    }

    fn finalizers(&self) -> &[String] {
        ResourceExt::finalizers(self)
    }

    fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    fn organization_name(&self) -> &str {
        &self.spec.organization_name
    }

    fn credentials_secret(&self) -> (String, Option<String>) {
        (
            self.spec.credentials_secret.clone(),
            Some(self.spec.credentials_secret_namespace.clone()),
        )
    }

    fn workspace_id(&self) -> Option<&str> {
        self.spec.workspace_id.as_deref()
    }

    fn ready_interval(&self) -> Duration {
        Duration::from_secs(
            self.spec
                .ready_interval_seconds
                .unwrap_or(DEFAULT_WORKSPACE_READY_SECS),
        )
    }

    fn status(&self) -> Option<&WorkspaceStatus> {
        self.status.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workspace() -> Workspace {
        let mut ws = Workspace::new(
            "dev-space",
            WorkspaceSpec {
                organization_name: "my-org".to_string(),
                credentials_secret: "platform-creds".to_string(),
                workspace_id: None,
                ready_interval_seconds: None,
            },
        );
        ws.metadata.namespace = Some("team-a".to_string());
        ws.metadata.uid = Some("uid-1234".to_string());
        ws.metadata.generation = Some(2);
        ws
    }

    #[test]
    fn test_workspace_trait_accessors() {
        let ws = sample_workspace();
        assert_eq!(ws.kind(), WorkspaceKind::Namespaced);
        assert_eq!(RemoteWorkspace::name(&ws), "dev-space");
        assert_eq!(RemoteWorkspace::namespace(&ws), Some("team-a".to_string()));
        assert_eq!(RemoteWorkspace::uid(&ws), Some("uid-1234".to_string()));
        assert_eq!(RemoteWorkspace::generation(&ws), 2);
        assert_eq!(ws.organization_name(), "my-org");
        assert_eq!(
            ws.credentials_secret(),
            ("platform-creds".to_string(), Some("team-a".to_string()))
        );
    }

    #[test]
    fn test_workspace_default_ready_interval() {
        let ws = sample_workspace();
        assert_eq!(ws.ready_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_cluster_workspace_is_not_namespaced() {
        let cws = ClusterWorkspace::new(
            "shared-space",
            ClusterWorkspaceSpec {
                organization_name: "my-org".to_string(),
                credentials_secret: "platform-creds".to_string(),
                credentials_secret_namespace: "strata-system".to_string(),
                workspace_id: None,
                ready_interval_seconds: Some(120),
            },
        );
        assert_eq!(cws.kind(), WorkspaceKind::Cluster);
        assert_eq!(RemoteWorkspace::namespace(&cws), None);
        assert_eq!(cws.ready_interval(), Duration::from_secs(120));
        assert_eq!(
            cws.credentials_secret(),
            (
                "platform-creds".to_string(),
                Some("strata-system".to_string())
            )
        );
    }

    #[test]
    fn test_status_defaults_to_unprocessed_generation() {
        let status = WorkspaceStatus::default();
        assert_eq!(status.observed_generation, -1);
        assert!(status.conditions.is_empty());
        assert_eq!(status.state, ResourceState::Processing);
    }
}
