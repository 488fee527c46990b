//! Workspace and ClusterWorkspace reconciliation for Strata
//!
//! One state machine drives both kinds: the namespaced `Workspace` and the
//! cluster-scoped `ClusterWorkspace` share a status type and a reconciler,
//! parameterized over the `RemoteWorkspace` trait.

pub mod controller;

pub use controller::{
    error_policy, error_policy_cluster, reconcile, reconcile_cluster, Context, KubeClient,
    KubeClientImpl,
};

pub(crate) use strata_common::Error;
