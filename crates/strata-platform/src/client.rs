//! Capability traits abstracting the remote platform
//!
//! Three capabilities: organization-scoped operations (workspaces and role
//! grants), space-scoped operations (instances, bindings, plan lookup),
//! and a health check. Implementations promise to surface duplicate owner
//! tokens as a fatal inconsistency, never silently picking one record.

use async_trait::async_trait;
use serde_json::Value;
use strata_common::Error;

use crate::model::{Binding, Instance, Space};

/// Fields sent when creating a remote instance
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRequest {
    /// Remote instance name
    pub name: String,
    /// Remote plan id
    pub plan_id: String,
    /// Owner token written as a label
    pub owner: String,
    /// Local generation written as an annotation
    pub generation: i64,
    /// Parameter digest written as an annotation
    pub parameter_hash: String,
    /// Merged provisioning parameters
    pub parameters: Option<Value>,
    /// Tags for the remote instance
    pub tags: Vec<String>,
}

/// Fields sent when updating a remote instance
///
/// Only fields that actually changed are set; the platform cannot clear a
/// field via an empty value, so unset means untouched. An all-None changes
/// struct must not be sent at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceChanges {
    /// New remote name
    pub name: Option<String>,
    /// New plan id
    pub plan_id: Option<String>,
    /// New parameters
    pub parameters: Option<Value>,
    /// New tags
    pub tags: Option<Vec<String>>,
    /// New owner token label (orphan adoption)
    pub owner: Option<String>,
    /// New generation annotation
    pub generation: Option<i64>,
    /// New parameter digest annotation
    pub parameter_hash: Option<String>,
}

impl InstanceChanges {
    /// Whether the update would carry no fields
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Fields sent when creating a remote binding
#[derive(Clone, Debug, PartialEq)]
pub struct BindingRequest {
    /// Remote binding name
    pub name: String,
    /// Remote id of the instance being bound
    pub instance_id: String,
    /// Owner token written as a label
    pub owner: String,
    /// Local generation written as an annotation
    pub generation: i64,
    /// Parameter digest written as an annotation
    pub parameter_hash: String,
    /// Merged binding parameters
    pub parameters: Option<Value>,
}

/// Fields sent when updating a remote binding
///
/// The platform only supports metadata updates of bindings (labels and
/// annotations); parameter changes require delete and re-create.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingChanges {
    /// New owner token label (orphan adoption)
    pub owner: Option<String>,
    /// New generation annotation
    pub generation: Option<i64>,
    /// New parameter digest annotation
    pub parameter_hash: Option<String>,
}

impl BindingChanges {
    /// Whether the update would carry no fields
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Organization-scoped operations: workspace CRUD and role grants
#[async_trait]
pub trait OrganizationClient: Send + Sync {
    /// Find the managed space carrying the given owner token
    ///
    /// Errors with a fatal inconsistency when more than one record matches.
    async fn get_space_by_owner(&self, owner: &str) -> Result<Option<Space>, Error>;

    /// Find a space by its declared name (orphan adoption only)
    async fn get_space_by_name(&self, name: &str) -> Result<Option<Space>, Error>;

    /// List all managed spaces in the organization (cache sweep)
    async fn list_spaces(&self) -> Result<Vec<Space>, Error>;

    /// Create a space tagged with the owner token and generation
    async fn create_space(&self, name: &str, owner: &str, generation: i64) -> Result<(), Error>;

    /// Update a space's name and tracking metadata
    async fn update_space(
        &self,
        id: &str,
        name: &str,
        owner: &str,
        generation: i64,
    ) -> Result<(), Error>;

    /// Delete a space
    async fn delete_space(&self, id: &str) -> Result<(), Error>;

    /// Grant a user developer-level access on a space (idempotent)
    async fn add_developer(&self, space_id: &str, username: &str) -> Result<(), Error>;
}

/// Space-scoped operations: instance and binding CRUD, plan lookup
#[async_trait]
pub trait SpaceClient: Send + Sync {
    /// Find the managed instance carrying the given owner token
    ///
    /// Errors with a fatal inconsistency when more than one record matches.
    async fn get_instance_by_owner(&self, owner: &str) -> Result<Option<Instance>, Error>;

    /// Find an instance by its declared name (orphan adoption only)
    async fn get_instance_by_name(&self, name: &str) -> Result<Option<Instance>, Error>;

    /// List all managed instances in the space (cache population)
    async fn list_instances(&self) -> Result<Vec<Instance>, Error>;

    /// Create an instance
    async fn create_instance(&self, request: &InstanceRequest) -> Result<(), Error>;

    /// Update an instance; only set fields are sent
    async fn update_instance(&self, id: &str, changes: &InstanceChanges) -> Result<(), Error>;

    /// Delete an instance
    async fn delete_instance(&self, id: &str) -> Result<(), Error>;

    /// Resolve a plan id from offering and plan names
    async fn find_service_plan(&self, offering: &str, plan: &str) -> Result<String, Error>;

    /// Find the managed binding carrying the given owner token
    async fn get_binding_by_owner(&self, owner: &str) -> Result<Option<Binding>, Error>;

    /// Find a binding by its declared name (orphan adoption only)
    async fn get_binding_by_name(&self, name: &str) -> Result<Option<Binding>, Error>;

    /// List all managed bindings in the space (cache population)
    async fn list_bindings(&self) -> Result<Vec<Binding>, Error>;

    /// Create a binding
    async fn create_binding(&self, request: &BindingRequest) -> Result<(), Error>;

    /// Update a binding's tracking metadata; only set fields are sent
    async fn update_binding(&self, id: &str, changes: &BindingChanges) -> Result<(), Error>;

    /// Delete a binding
    async fn delete_binding(&self, id: &str) -> Result<(), Error>;
}

/// Lightweight health check against a remote workspace
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// `GET` the workspace; errors indicate the workspace is unreachable
    async fn check(&self, space_id: &str) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_changes_detection() {
        assert!(InstanceChanges::default().is_empty());
        assert!(BindingChanges::default().is_empty());

        let changes = InstanceChanges {
            generation: Some(3),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }
}
