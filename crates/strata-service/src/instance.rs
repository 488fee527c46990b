//! ServiceInstance controller implementation
//!
//! The reconciler gates on the backing workspace being Ready, merges the
//! parameter sources, and drives a decision table over the remote
//! instance's lifecycle state. Retryable platform failures feed a counted
//! retry policy with a growing backoff; everything else surfaces directly
//! in the Ready condition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use strata_common::annotations::ReconcileAnnotations;
use strata_common::crd::{
    ready_condition, set_ready_condition, ClusterWorkspace, Condition, ConditionStatus,
    RemoteWorkspace, ResourceState, ServiceBinding, ServiceInstance, ServiceInstanceStatus,
    Workspace,
};
use strata_common::digest::parameter_digest;
use strata_common::{
    Error, DEFAULT_READY_INTERVAL_SECS, FINALIZER, INSTANCE_LABEL, REQUEUE_IMMEDIATE_SECS,
    REQUEUE_WAIT_SECS, WORKSPACE_LABEL,
};
use strata_platform::cache::instance_by_owner;
use strata_platform::{
    ClientFactory, Credentials, HttpClientFactory, Instance, InstanceChanges, InstanceRequest,
    RemoteState, ResourceCache, SpaceClient,
};

use crate::parameters::{fragment_from_secret, merge_with_fragments};
use crate::retry::retry_delay;
use crate::workspace_ref::{gate, gate_for_deletion, WorkspaceGate};

/// Trait abstracting Kubernetes client operations for service instances
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a namespaced Workspace
    async fn get_workspace(&self, name: &str, namespace: &str)
        -> Result<Option<Workspace>, Error>;

    /// Get a ClusterWorkspace
    async fn get_cluster_workspace(&self, name: &str) -> Result<Option<ClusterWorkspace>, Error>;

    /// Get a Secret by name and namespace
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Patch the status of a ServiceInstance
    async fn patch_instance_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ServiceInstanceStatus,
    ) -> Result<(), Error>;

    /// Add the Strata finalizer to a ServiceInstance
    async fn add_instance_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the Strata finalizer from a ServiceInstance
    async fn remove_instance_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Label the instance with its workspace so workspace deletion can
    /// discover its dependents by selector
    async fn set_workspace_label(
        &self,
        name: &str,
        namespace: &str,
        workspace: &str,
    ) -> Result<(), Error>;

    /// Count ServiceBindings labeled as bound to the given instance
    async fn count_dependent_bindings(
        &self,
        instance: &str,
        namespace: &str,
    ) -> Result<usize, Error>;
}

/// Shared context for instance reconciliations
pub struct Context {
    /// Kubernetes operations
    pub kube: Arc<dyn KubeClient>,
    /// Platform client construction
    pub factory: Arc<dyn ClientFactory>,
    /// Optional remote record cache, keyed by owner token
    pub cache: Option<Arc<ResourceCache<Instance>>>,
}

impl Context {
    /// Create a production context from a Kubernetes client
    pub fn new(client: Client, cache: Option<Arc<ResourceCache<Instance>>>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            factory: Arc::new(HttpClientFactory::new()),
            cache,
        }
    }

    /// Create a context with injected collaborators (tests)
    pub fn for_testing(kube: Arc<dyn KubeClient>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            kube,
            factory,
            cache: None,
        }
    }
}

/// Reconcile a ServiceInstance
#[instrument(skip(instance, ctx), fields(instance = %instance.name_any()))]
pub async fn reconcile(instance: Arc<ServiceInstance>, ctx: Arc<Context>) -> Result<Action, Error> {
    match run(&instance, &ctx).await {
        Ok(action) => Ok(action),
        Err(err) if err.is_retryable() && instance.meta().deletion_timestamp.is_none() => {
            retry_or_give_up(&instance, &ctx, &err).await
        }
        Err(err) => {
            record_error_status(&instance, &ctx, &err).await;
            Err(err)
        }
    }
}

/// Requeue policy on reconciliation errors
///
/// Only non-retryable errors reach this; retryable platform failures are
/// absorbed by the retry policy, which schedules its own backoff.
pub fn error_policy(instance: Arc<ServiceInstance>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(?err, instance = %instance.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS))
}

async fn run(instance: &ServiceInstance, ctx: &Context) -> Result<Action, Error> {
    let name = instance.name_any();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::internal("service instance has no namespace"))?;
    let owner = instance
        .uid()
        .ok_or_else(|| Error::internal("service instance has no uid"))?;
    let generation = instance.metadata.generation.unwrap_or(0);
    let annotations = ReconcileAnnotations::new(instance.annotations());
    info!("reconciling service instance");

    if instance.meta().deletion_timestamp.is_some() {
        return handle_deletion(instance, ctx, &name, &namespace, &owner).await;
    }

    if ready_condition(current_conditions(instance)).is_none() {
        let mut status = next_status(instance);
        status.state = ResourceState::Processing;
        set_ready_condition(
            &mut status.conditions,
            Condition::ready(ConditionStatus::Unknown, "FirstSeen", "first reconciliation"),
        );
        patch_status(ctx, &name, &namespace, &status).await?;
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
    }

    if !instance.finalizers().iter().any(|f| f == FINALIZER) {
        debug!("adding finalizer");
        ctx.kube.add_instance_finalizer(&name, &namespace).await?;
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
    }

    if instance.labels().get(WORKSPACE_LABEL) != Some(&instance.spec.workspace) {
        ctx.kube
            .set_workspace_label(&name, &namespace, &instance.spec.workspace)
            .await?;
    }

    let workspace = match fetch_workspace(ctx, &instance.spec.workspace, &namespace).await? {
        Some(ws) => ws,
        None => {
            return wait_for_workspace(
                ctx,
                instance,
                &name,
                &namespace,
                format!("workspace {} not found", instance.spec.workspace),
            )
            .await;
        }
    };
    let (space_id, organization, credentials) = match gate(workspace.as_ref(), &namespace) {
        WorkspaceGate::NotReady { message } => {
            return wait_for_workspace(ctx, instance, &name, &namespace, message).await;
        }
        WorkspaceGate::Ready {
            space_id,
            organization,
            secret_name,
            secret_namespace,
        } => {
            let credentials =
                platform_credentials(ctx, &secret_name, &secret_namespace).await?;
            (space_id, organization, credentials)
        }
    };
    let space = ctx
        .factory
        .space_client(&credentials, &organization, &space_id)?;

    let parameters = resolve_parameters(ctx, instance, &namespace).await?;
    let digest = parameter_digest(generation, parameters.as_ref());
    let plan_id = resolve_plan(instance, space.as_ref()).await?;
    let remote_name = instance.spec.remote_name(&name).to_string();

    let mut mutated = false;
    let record = instance_by_owner(ctx.cache.as_deref(), space.as_ref(), &owner).await?;
    let record = match record {
        None => {
            if annotations.adopt() {
                if let Some(orphan) = space.get_instance_by_name(&remote_name).await? {
                    return adopt_orphan(
                        ctx, instance, &name, &namespace, &owner, generation, &digest, &orphan,
                        space.as_ref(),
                    )
                    .await;
                }
            }
            info!(%remote_name, "remote instance not found, creating");
            space
                .create_instance(&InstanceRequest {
                    name: remote_name.clone(),
                    plan_id: plan_id.clone(),
                    owner: owner.clone(),
                    generation,
                    parameter_hash: digest.clone(),
                    parameters: parameters.clone(),
                    tags: instance.spec.tags.clone(),
                })
                .await?;
            mutated = true;
            refetch(ctx, space.as_ref(), &owner, &name).await?
        }
        Some(record) => match record.state {
            RemoteState::Deleting | RemoteState::Deleted => {
                info!(instance_id = %record.id, "remote instance is going away, waiting");
                return wait_processing(
                    ctx,
                    instance,
                    &name,
                    &namespace,
                    "RemoteDeleting",
                    "remote instance is being deleted".to_string(),
                )
                .await;
            }
            state if state.is_failed() && annotations.recreate_on_failure() => {
                info!(instance_id = %record.id, %state, "remote instance failed, recreating");
                space.delete_instance(&record.id).await?;
                if let Some(cache) = &ctx.cache {
                    cache.invalidate(&owner);
                }
                let mut status = next_status(instance);
                status.state = ResourceState::Processing;
                status.last_modified_at = Some(Utc::now());
                set_ready_condition(
                    &mut status.conditions,
                    Condition::ready(
                        ConditionStatus::Unknown,
                        "Recreating",
                        "failed remote instance deleted, re-creating",
                    ),
                );
                patch_status(ctx, &name, &namespace, &status).await?;
                return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
            }
            RemoteState::Creating | RemoteState::Updating => record,
            _ if is_stale(&record, generation, &digest) => {
                let mut changes = InstanceChanges {
                    generation: Some(generation),
                    parameter_hash: Some(digest.clone()),
                    ..Default::default()
                };
                if record.name != remote_name {
                    changes.name = Some(remote_name.clone());
                }
                if record.plan_id.as_deref() != Some(plan_id.as_str()) {
                    changes.plan_id = Some(plan_id.clone());
                }
                if record.parameter_hash.as_deref() != Some(digest.as_str()) {
                    changes.parameters = parameters.clone();
                }
                if record.tags != instance.spec.tags {
                    changes.tags = Some(instance.spec.tags.clone());
                }
                info!(instance_id = %record.id, "remote instance stale, updating");
                space.update_instance(&record.id, &changes).await?;
                mutated = true;
                refetch(ctx, space.as_ref(), &owner, &name).await?
            }
            _ => {
                debug!(instance_id = %record.id, "remote instance up to date");
                record
            }
        },
    };

    project_status(ctx, instance, &name, &namespace, generation, &digest, &record, mutated).await
}

/// Whether the remote record lags behind the declared state
fn is_stale(record: &Instance, generation: i64, digest: &str) -> bool {
    record.generation != Some(generation)
        || record.parameter_hash.as_deref() != Some(digest)
        || record.state.is_failed()
}

/// Post-mutation read-back; absence right after a create/update is fatal
async fn refetch(
    ctx: &Context,
    space: &dyn SpaceClient,
    owner: &str,
    name: &str,
) -> Result<Instance, Error> {
    if let Some(cache) = &ctx.cache {
        cache.invalidate(owner);
    }
    let record = space.get_instance_by_owner(owner).await?.ok_or_else(|| {
        Error::inconsistent(name, "remote instance absent right after create/update")
    })?;
    if let Some(cache) = &ctx.cache {
        cache.insert(owner, record.clone());
    }
    Ok(record)
}

/// Re-tag an orphaned remote record instead of creating a duplicate
#[allow(clippy::too_many_arguments)]
async fn adopt_orphan(
    ctx: &Context,
    instance: &ServiceInstance,
    name: &str,
    namespace: &str,
    owner: &str,
    generation: i64,
    digest: &str,
    orphan: &Instance,
    space: &dyn SpaceClient,
) -> Result<Action, Error> {
    if orphan.state != RemoteState::Ready {
        return Err(Error::inconsistent(
            name,
            format!(
                "orphaned remote instance {} is in state {} and cannot be adopted",
                orphan.id, orphan.state
            ),
        ));
    }
    info!(instance_id = %orphan.id, "adopting orphaned remote instance");
    space
        .update_instance(
            &orphan.id,
            &InstanceChanges {
                owner: Some(owner.to_string()),
                generation: Some(generation),
                parameter_hash: Some(digest.to_string()),
                ..Default::default()
            },
        )
        .await?;
    if let Some(cache) = &ctx.cache {
        cache.invalidate(owner);
    }

    let mut status = next_status(instance);
    status.state = ResourceState::Processing;
    status.instance_id = Some(orphan.id.clone());
    status.last_modified_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(
            ConditionStatus::Unknown,
            "Adopting",
            "orphaned remote instance adopted",
        ),
    );
    patch_status(ctx, name, namespace, &status).await?;
    Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)))
}

/// Project the final remote state into status and pick the requeue
#[allow(clippy::too_many_arguments)]
async fn project_status(
    ctx: &Context,
    instance: &ServiceInstance,
    name: &str,
    namespace: &str,
    generation: i64,
    digest: &str,
    record: &Instance,
    mutated: bool,
) -> Result<Action, Error> {
    let annotations = ReconcileAnnotations::new(instance.annotations());
    let mut status = next_status(instance);
    status.instance_id = Some(record.id.clone());
    status.last_reconciled_at = Some(Utc::now());
    status.max_retries = annotations.max_retries();
    if mutated {
        status.last_modified_at = Some(Utc::now());
    }

    let action = match record.state {
        RemoteState::Ready => {
            status.observed_generation = generation;
            status.service_instance_digest = Some(digest.to_string());
            status.state = ResourceState::Ready;
            status.retry_counter = 0;
            set_ready_condition(
                &mut status.conditions,
                Condition::ready(ConditionStatus::True, "Ready", "service instance is ready"),
            );
            Action::requeue(
                annotations
                    .ready_interval()
                    .unwrap_or(Duration::from_secs(DEFAULT_READY_INTERVAL_SECS)),
            )
        }
        RemoteState::Creating | RemoteState::Updating | RemoteState::Unknown => {
            status.state = ResourceState::Processing;
            set_ready_condition(
                &mut status.conditions,
                Condition::ready(
                    ConditionStatus::Unknown,
                    "Provisioning",
                    format!("remote instance is {}", record.state),
                ),
            );
            Action::requeue(processing_interval(&annotations))
        }
        RemoteState::Deleting | RemoteState::Deleted => {
            status.state = ResourceState::Processing;
            set_ready_condition(
                &mut status.conditions,
                Condition::ready(
                    ConditionStatus::Unknown,
                    "RemoteDeleting",
                    "remote instance is being deleted",
                ),
            );
            Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS))
        }
        failed => {
            status.state = ResourceState::Error;
            set_ready_condition(
                &mut status.conditions,
                Condition::ready(
                    ConditionStatus::False,
                    format!("{failed}"),
                    format!("remote instance is in terminal state {failed}"),
                ),
            );
            annotations
                .fail_interval()
                .map(Action::requeue)
                .unwrap_or_else(Action::await_change)
        }
    };

    patch_status(ctx, name, namespace, &status).await?;
    Ok(action)
}

async fn handle_deletion(
    instance: &ServiceInstance,
    ctx: &Context,
    name: &str,
    namespace: &str,
    owner: &str,
) -> Result<Action, Error> {
    if !instance.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    let dependents = ctx.kube.count_dependent_bindings(name, namespace).await?;
    if dependents > 0 {
        info!(dependents, "deletion blocked by dependent service bindings");
        return wait_deleting(
            ctx,
            instance,
            name,
            namespace,
            "DeletionBlocked",
            format!("{dependents} dependent service binding(s) still exist"),
        )
        .await;
    }

    if instance.finalizers().iter().any(|f| f != FINALIZER) {
        info!("deletion blocked by foreign finalizers");
        return wait_deleting(
            ctx,
            instance,
            name,
            namespace,
            "ForeignFinalizers",
            "waiting for foreign finalizers to be removed".to_string(),
        )
        .await;
    }

    let workspace = fetch_workspace(ctx, &instance.spec.workspace, namespace)
        .await?
        .ok_or_else(|| {
            Error::config(format!(
                "workspace {} not found while deleting instance",
                instance.spec.workspace
            ))
        })?;
    let (space_id, organization, secret_name, secret_namespace) =
        match gate_for_deletion(workspace.as_ref(), namespace) {
            WorkspaceGate::NotReady { message } => {
                return wait_deleting(ctx, instance, name, namespace, "WorkspaceNotReady", message)
                    .await;
            }
            WorkspaceGate::Ready {
                space_id,
                organization,
                secret_name,
                secret_namespace,
            } => (space_id, organization, secret_name, secret_namespace),
        };
    let credentials = platform_credentials(ctx, &secret_name, &secret_namespace).await?;
    let space = ctx
        .factory
        .space_client(&credentials, &organization, &space_id)?;

    // Deletion reads bypass the cache; a stale hit here could re-issue a
    // delete or miss a record that still exists.
    match space.get_instance_by_owner(owner).await? {
        Some(record) if record.state == RemoteState::Deleting => {
            debug!(instance_id = %record.id, "remote deletion already in progress");
            wait_deleting(
                ctx,
                instance,
                name,
                namespace,
                "Deleting",
                "waiting for remote instance deletion".to_string(),
            )
            .await
        }
        Some(record) => {
            info!(instance_id = %record.id, "deleting remote instance");
            space.delete_instance(&record.id).await?;
            if let Some(cache) = &ctx.cache {
                cache.invalidate(owner);
            }
            wait_deleting(
                ctx,
                instance,
                name,
                namespace,
                "Deleting",
                "waiting for remote instance deletion".to_string(),
            )
            .await
        }
        None => {
            if let Some(cache) = &ctx.cache {
                cache.invalidate(owner);
            }
            ctx.kube.remove_instance_finalizer(name, namespace).await?;
            info!("service instance released");
            Ok(Action::await_change())
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn fetch_workspace(
    ctx: &Context,
    workspace: &str,
    namespace: &str,
) -> Result<Option<Box<dyn RemoteWorkspace>>, Error> {
    if let Some(ws) = ctx.kube.get_workspace(workspace, namespace).await? {
        return Ok(Some(Box::new(ws)));
    }
    if let Some(ws) = ctx.kube.get_cluster_workspace(workspace).await? {
        return Ok(Some(Box::new(ws)));
    }
    Ok(None)
}

async fn platform_credentials(
    ctx: &Context,
    secret_name: &str,
    secret_namespace: &str,
) -> Result<Credentials, Error> {
    let secret = ctx
        .kube
        .get_secret(secret_name, secret_namespace)
        .await?
        .ok_or_else(|| Error::secret(secret_name, secret_namespace, "not found"))?;
    let data = secret
        .data
        .ok_or_else(|| Error::secret(secret_name, secret_namespace, "has no data"))?;
    Credentials::from_secret_data(secret_name, secret_namespace, &data)
}

async fn resolve_parameters(
    ctx: &Context,
    instance: &ServiceInstance,
    namespace: &str,
) -> Result<Option<serde_json::Value>, Error> {
    let mut fragments = Vec::with_capacity(instance.spec.parameters_from.len());
    for source in &instance.spec.parameters_from {
        let secret = ctx
            .kube
            .get_secret(&source.name, namespace)
            .await?
            .ok_or_else(|| Error::secret(&source.name, namespace, "not found"))?;
        let fragment = fragment_from_secret(&secret, &source.name, namespace, &source.key)?;
        fragments.push((
            format!("secret {namespace}/{} key {}", source.name, source.key),
            fragment,
        ));
    }
    merge_with_fragments(instance.spec.parameters.as_ref(), &fragments)
}

/// Resolve the remote plan id; a direct id beats a name pair
async fn resolve_plan(instance: &ServiceInstance, space: &dyn SpaceClient) -> Result<String, Error> {
    if let Some(id) = &instance.spec.service_plan_id {
        return Ok(id.clone());
    }
    match (
        &instance.spec.service_offering_name,
        &instance.spec.service_plan_name,
    ) {
        (Some(offering), Some(plan)) => space.find_service_plan(offering, plan).await,
        _ => Err(Error::config_field(
            "spec.servicePlanId",
            "either servicePlanId or both serviceOfferingName and servicePlanName must be set",
        )),
    }
}

fn processing_interval(annotations: &ReconcileAnnotations<'_>) -> Duration {
    annotations
        .reconcile_timeout()
        .unwrap_or(Duration::from_secs(REQUEUE_WAIT_SECS))
}

fn current_conditions(instance: &ServiceInstance) -> &[Condition] {
    instance
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or(&[])
}

fn next_status(instance: &ServiceInstance) -> ServiceInstanceStatus {
    instance.status.clone().unwrap_or_default()
}

async fn patch_status(
    ctx: &Context,
    name: &str,
    namespace: &str,
    status: &ServiceInstanceStatus,
) -> Result<(), Error> {
    ctx.kube
        .patch_instance_status(name, namespace, status)
        .await
}

async fn wait_for_workspace(
    ctx: &Context,
    instance: &ServiceInstance,
    name: &str,
    namespace: &str,
    message: String,
) -> Result<Action, Error> {
    wait_processing(ctx, instance, name, namespace, "WorkspaceNotReady", message).await
}

async fn wait_processing(
    ctx: &Context,
    instance: &ServiceInstance,
    name: &str,
    namespace: &str,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    let annotations = ReconcileAnnotations::new(instance.annotations());
    let mut status = next_status(instance);
    status.state = ResourceState::Processing;
    status.last_reconciled_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::Unknown, reason, message),
    );
    patch_status(ctx, name, namespace, &status).await?;
    Ok(Action::requeue(processing_interval(&annotations)))
}

async fn wait_deleting(
    ctx: &Context,
    instance: &ServiceInstance,
    name: &str,
    namespace: &str,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    let mut status = next_status(instance);
    status.state = ResourceState::Deleting;
    status.last_reconciled_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::Unknown, reason, message),
    );
    patch_status(ctx, name, namespace, &status).await?;
    Ok(Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS)))
}

/// Counted retry for retryable platform failures
///
/// Increments the retry counter and either requeues with the growing
/// backoff or, once the annotation budget is exhausted, parks the resource
/// in a terminal Error state.
async fn retry_or_give_up(
    instance: &ServiceInstance,
    ctx: &Context,
    err: &Error,
) -> Result<Action, Error> {
    let name = instance.name_any();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::internal("service instance has no namespace"))?;
    let annotations = ReconcileAnnotations::new(instance.annotations());

    let mut status = next_status(instance);
    status.retry_counter += 1;
    status.max_retries = annotations.max_retries();
    status.last_reconciled_at = Some(Utc::now());
    status.state = ResourceState::Error;

    if let Some(max) = status.max_retries {
        if status.retry_counter >= max {
            warn!(
                retries = status.retry_counter,
                error = %err,
                "retry budget exhausted, giving up"
            );
            set_ready_condition(
                &mut status.conditions,
                Condition::ready(
                    ConditionStatus::False,
                    "MaximumRetriesExceeded",
                    format!("giving up after {} retryable failures: {err}", status.retry_counter),
                ),
            );
            patch_status(ctx, &name, &namespace, &status).await?;
            return Ok(annotations
                .fail_interval()
                .map(Action::requeue)
                .unwrap_or_else(Action::await_change));
        }
    }

    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::False, "PlatformError", err.to_string()),
    );
    let delay = retry_delay(&status.conditions, Utc::now());
    warn!(
        retries = status.retry_counter,
        delay_secs = delay.as_secs(),
        error = %err,
        "retryable platform failure, backing off"
    );
    patch_status(ctx, &name, &namespace, &status).await?;
    Ok(Action::requeue(delay))
}

/// Deferred error projection for non-retryable failures
async fn record_error_status(instance: &ServiceInstance, ctx: &Context, err: &Error) {
    if instance.meta().deletion_timestamp.is_some()
        && !instance.finalizers().iter().any(|f| f == FINALIZER)
    {
        return;
    }
    let name = instance.name_any();
    let Some(namespace) = instance.namespace() else {
        return;
    };

    let reason = match err {
        Error::Config { .. } | Error::Secret { .. } => "ConfigurationError",
        Error::Inconsistent { .. } => "InconsistentState",
        Error::Platform { .. } => "PlatformError",
        _ => "ReconcileFailed",
    };

    let mut status = next_status(instance);
    status.state = ResourceState::Error;
    status.last_reconciled_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::False, reason, err.to_string()),
    );
    if let Err(patch_err) = patch_status(ctx, &name, &namespace, &status).await {
        warn!(error = %patch_err, "failed to record error status");
    }
}

// =============================================================================
// Production Kubernetes client
// =============================================================================

/// Real implementation of [`KubeClient`] backed by kube-rs
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a client implementation
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn instances(&self, namespace: &str) -> Api<ServiceInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_workspace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Workspace>, Error> {
        let api: Api<Workspace> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(ws) => Ok(Some(ws)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cluster_workspace(&self, name: &str) -> Result<Option<ClusterWorkspace>, Error> {
        let api: Api<ClusterWorkspace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(ws) => Ok(Some(ws)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_instance_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ServiceInstanceStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.instances(namespace)
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn add_instance_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api = self.instances(namespace);
        let instance = api.get(name).await?;
        let mut finalizers = instance.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_instance_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api = self.instances(namespace);
        let instance = api.get(name).await?;
        let mut finalizers = instance.metadata.finalizers.unwrap_or_default();
        finalizers.retain(|f| f != FINALIZER);
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_workspace_label(
        &self,
        name: &str,
        namespace: &str,
        workspace: &str,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": { "labels": { WORKSPACE_LABEL: workspace } }
        });
        self.instances(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn count_dependent_bindings(
        &self,
        instance: &str,
        namespace: &str,
    ) -> Result<usize, Error> {
        let api: Api<ServiceBinding> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{INSTANCE_LABEL}={instance}"));
        let bindings = api.list(&params).await?;
        Ok(bindings.items.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
