//! ServiceInstance and ServiceBinding reconciliation for Strata
//!
//! Both reconcilers drive a decision table over the remote record's
//! lifecycle state. Instances carry a counted retry policy with a growing
//! backoff; bindings materialize remote credentials into a target secret
//! and support rotation by delete-and-recreate.

pub mod binding;
pub mod credentials;
pub mod instance;
mod parameters;
pub mod retry;
mod workspace_ref;

pub use binding::{
    error_policy as binding_error_policy, reconcile as reconcile_binding,
    Context as BindingContext, KubeClient as BindingKubeClient,
    KubeClientImpl as BindingKubeClientImpl,
};
pub use instance::{
    error_policy as instance_error_policy, reconcile as reconcile_instance,
    Context as InstanceContext, KubeClient as InstanceKubeClient,
    KubeClientImpl as InstanceKubeClientImpl,
};
