//! Custom Resource Definitions for the Strata operator

pub mod service_binding;
pub mod service_instance;
pub mod types;
pub mod workspace;

pub use service_binding::{ServiceBinding, ServiceBindingSpec, ServiceBindingStatus};
pub use service_instance::{
    ParametersFromSource, ServiceInstance, ServiceInstanceSpec, ServiceInstanceStatus,
};
pub use types::{
    is_ready, ready_condition, set_ready_condition, Condition, ConditionStatus, ResourceState,
    CONDITION_READY,
};
pub use workspace::{
    ClusterWorkspace, ClusterWorkspaceSpec, RemoteWorkspace, Workspace, WorkspaceKind,
    WorkspaceSpec, WorkspaceStatus,
};
