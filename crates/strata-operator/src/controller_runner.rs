//! Controller runner - builds controller futures for each resource kind
//!
//! Each `build_*` function returns a Vec of boxed futures that can be
//! composed by the caller. This keeps controller construction pure and
//! keeps `main` to wiring only.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use strata_common::crd::{ClusterWorkspace, ServiceBinding, ServiceInstance, Workspace};
use strata_platform::{Binding, Instance, ResourceCache, Space};
use strata_service::{
    binding_error_policy, instance_error_policy, reconcile_binding, reconcile_instance,
    BindingContext, InstanceContext,
};
use strata_workspace::{
    error_policy as workspace_error_policy, error_policy_cluster, reconcile as reconcile_workspace,
    reconcile_cluster, Context as WorkspaceContext,
};

/// Watcher timeout (seconds) - must be less than the client read timeout
/// (30s) so the API server closes idle watches before the client does.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// TTL for the remote record caches shared within each controller
const REMOTE_CACHE_TTL_SECS: u64 = 60;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the Workspace and ClusterWorkspace controller futures
pub fn build_workspace_controllers(client: Client) -> Vec<ControllerFuture> {
    let space_cache: Arc<ResourceCache<Space>> = Arc::new(ResourceCache::new(
        Duration::from_secs(REMOTE_CACHE_TTL_SECS),
    ));
    let ctx = Arc::new(WorkspaceContext::new(client.clone(), Some(space_cache)));

    let workspaces: Api<Workspace> = Api::all(client.clone());
    let workspace_ctrl = Controller::new(
        workspaces,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile_workspace, workspace_error_policy, ctx.clone())
    .for_each(log_reconcile_result("Workspace"));

    let cluster_workspaces: Api<ClusterWorkspace> = Api::all(client);
    let cluster_ctrl = Controller::new(
        cluster_workspaces,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile_cluster, error_policy_cluster, ctx)
    .for_each(log_reconcile_result("ClusterWorkspace"));

    tracing::info!("- Workspace controller");
    tracing::info!("- ClusterWorkspace controller");

    vec![Box::pin(workspace_ctrl), Box::pin(cluster_ctrl)]
}

/// Build the ServiceInstance and ServiceBinding controller futures
///
/// The binding controller runs with a concurrency of one: the remote
/// platform serializes binding operations per space, and concurrent
/// reconciliations would only trip over each other's credentials secrets.
pub fn build_service_controllers(client: Client) -> Vec<ControllerFuture> {
    let instance_cache: Arc<ResourceCache<Instance>> = Arc::new(ResourceCache::new(
        Duration::from_secs(REMOTE_CACHE_TTL_SECS),
    ));
    let binding_cache: Arc<ResourceCache<Binding>> = Arc::new(ResourceCache::new(
        Duration::from_secs(REMOTE_CACHE_TTL_SECS),
    ));

    let instance_ctx = Arc::new(InstanceContext::new(client.clone(), Some(instance_cache)));
    let instances: Api<ServiceInstance> = Api::all(client.clone());
    let instance_ctrl = Controller::new(
        instances,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile_instance, instance_error_policy, instance_ctx)
    .for_each(log_reconcile_result("ServiceInstance"));

    let binding_ctx = Arc::new(BindingContext::new(client.clone(), Some(binding_cache)));
    let bindings: Api<ServiceBinding> = Api::all(client);
    let binding_ctrl = Controller::new(
        bindings,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .with_config(ControllerConfig::default().concurrency(1))
    .shutdown_on_signal()
    .run(reconcile_binding, binding_error_policy, binding_ctx)
    .for_each(log_reconcile_result("ServiceBinding"));

    tracing::info!("- ServiceInstance controller");
    tracing::info!("- ServiceBinding controller (concurrency 1)");

    vec![Box::pin(instance_ctrl), Box::pin(binding_ctrl)]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
