//! Strata operator: controller assembly for the Strata CRDs
//!
//! The binary wires four controllers over the reconcilers in
//! `strata-workspace` and `strata-service`: Workspace, ClusterWorkspace,
//! ServiceInstance, and ServiceBinding.

pub mod controller_runner;
