//! ServiceBinding controller implementation
//!
//! A binding requires both its ServiceInstance and that instance's
//! workspace to be Ready. The remote platform only supports metadata
//! updates on bindings; real parameter changes and backing-instance
//! changes rotate the binding by delete-and-recreate when the matching
//! annotations opt in. On Ready the remote credentials are materialized
//! into a target secret owned by the binding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use strata_common::annotations::ReconcileAnnotations;
use strata_common::crd::{
    is_ready, ready_condition, set_ready_condition, ClusterWorkspace, Condition, ConditionStatus,
    RemoteWorkspace, ResourceState, ServiceBinding, ServiceBindingStatus, ServiceInstance,
    Workspace,
};
use strata_common::digest::parameter_digest;
use strata_common::{
    Error, DEFAULT_READY_INTERVAL_SECS, FINALIZER, INSTANCE_LABEL, REQUEUE_IMMEDIATE_SECS,
    REQUEUE_WAIT_SECS,
};
use strata_platform::cache::binding_by_owner;
use strata_platform::{
    Binding, BindingChanges, BindingRequest, ClientFactory, Credentials, HttpClientFactory,
    RemoteState, ResourceCache, SpaceClient,
};

use crate::credentials::{secret_payload, BindingDescriptor};
use crate::parameters::{fragment_from_secret, merge_with_fragments};
use crate::workspace_ref::{gate, gate_for_deletion, WorkspaceGate};

/// Trait abstracting Kubernetes client operations for service bindings
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a ServiceInstance by name and namespace
    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServiceInstance>, Error>;

    /// Get a namespaced Workspace
    async fn get_workspace(&self, name: &str, namespace: &str)
        -> Result<Option<Workspace>, Error>;

    /// Get a ClusterWorkspace
    async fn get_cluster_workspace(&self, name: &str) -> Result<Option<ClusterWorkspace>, Error>;

    /// Get a Secret by name and namespace
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Create or replace a secret (name and namespace from its metadata)
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; absence is not an error
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Patch the status of a ServiceBinding
    async fn patch_binding_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ServiceBindingStatus,
    ) -> Result<(), Error>;

    /// Add the Strata finalizer to a ServiceBinding
    async fn add_binding_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the Strata finalizer from a ServiceBinding
    async fn remove_binding_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Label the binding with its instance so instance deletion can
    /// discover its dependents by selector
    async fn set_instance_label(
        &self,
        name: &str,
        namespace: &str,
        instance: &str,
    ) -> Result<(), Error>;
}

/// Shared context for binding reconciliations
pub struct Context {
    /// Kubernetes operations
    pub kube: Arc<dyn KubeClient>,
    /// Platform client construction
    pub factory: Arc<dyn ClientFactory>,
    /// Optional remote record cache, keyed by owner token
    pub cache: Option<Arc<ResourceCache<Binding>>>,
}

impl Context {
    /// Create a production context from a Kubernetes client
    pub fn new(client: Client, cache: Option<Arc<ResourceCache<Binding>>>) -> Self {
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

/// Reconcile a ServiceBinding
#[instrument(skip(binding, ctx), fields(binding = %binding.name_any()))]
pub async fn reconcile(binding: Arc<ServiceBinding>, ctx: Arc<Context>) -> Result<Action, Error> {
    match run(&binding, &ctx).await {
        Ok(action) => Ok(action),
        Err(err) => {
            record_error_status(&binding, &ctx, &err).await;
            Err(err)
        }
    }
}

/// Requeue policy on reconciliation errors
pub fn error_policy(binding: Arc<ServiceBinding>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(?err, binding = %binding.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS))
}

async fn run(binding: &ServiceBinding, ctx: &Context) -> Result<Action, Error> {
    let name = binding.name_any();
    let namespace = binding
        .namespace()
        .ok_or_else(|| Error::internal("service binding has no namespace"))?;
    let owner = binding
        .uid()
        .ok_or_else(|| Error::internal("service binding has no uid"))?;
    let generation = binding.metadata.generation.unwrap_or(0);
    let annotations = ReconcileAnnotations::new(binding.annotations());
    info!("reconciling service binding");

    if binding.meta().deletion_timestamp.is_some() {
        return handle_deletion(binding, ctx, &name, &namespace, &owner).await;
    }

    if ready_condition(current_conditions(binding)).is_none() {
        let mut status = next_status(binding);
        status.state = ResourceState::Processing;
        set_ready_condition(
            &mut status.conditions,
            Condition::ready(ConditionStatus::Unknown, "FirstSeen", "first reconciliation"),
        );
        patch_status(ctx, &name, &namespace, &status).await?;
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
    }

    if !binding.finalizers().iter().any(|f| f == FINALIZER) {
        debug!("adding finalizer");
        ctx.kube.add_binding_finalizer(&name, &namespace).await?;
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
    }

    if binding.labels().get(INSTANCE_LABEL) != Some(&binding.spec.service_instance) {
        ctx.kube
            .set_instance_label(&name, &namespace, &binding.spec.service_instance)
            .await?;
    }

    let backing = match resolve_backing(ctx, binding, &namespace).await? {
        Ok(backing) => backing,
        Err((reason, message)) => {
            return wait_processing(ctx, binding, &name, &namespace, reason, message).await;
        }
    };
    let space = match gate(backing.workspace.as_ref(), &namespace) {
        WorkspaceGate::NotReady { message } => {
            return wait_processing(ctx, binding, &name, &namespace, "WorkspaceNotReady", message)
                .await;
        }
        WorkspaceGate::Ready {
            space_id,
            organization,
            secret_name,
            secret_namespace,
        } => {
            let credentials =
                platform_credentials(ctx, &secret_name, &secret_namespace).await?;
            ctx.factory
                .space_client(&credentials, &organization, &space_id)?
        }
    };

    let parameters = resolve_parameters(ctx, binding, &namespace).await?;
    let digest = parameter_digest(generation, parameters.as_ref());
    let remote_name = binding.spec.remote_name(&name).to_string();

    let mut mutated = false;
    let record = binding_by_owner(ctx.cache.as_deref(), space.as_ref(), &owner).await?;
    let record = match record {
        None => {
            if annotations.adopt() {
                if let Some(orphan) = space.get_binding_by_name(&remote_name).await? {
                    return adopt_orphan(
                        ctx, binding, &name, &namespace, &owner, generation, &digest, &orphan,
                        space.as_ref(),
                    )
                    .await;
                }
            }
            info!(%remote_name, "remote binding not found, creating");
            space
                .create_binding(&BindingRequest {
                    name: remote_name.clone(),
                    instance_id: backing.instance_id.clone(),
                    owner: owner.clone(),
                    generation,
                    parameter_hash: digest.clone(),
                    parameters: parameters.clone(),
                })
                .await?;
            mutated = true;
            refetch(ctx, space.as_ref(), &owner, &name).await?
        }
        Some(record) => match record.state {
            RemoteState::Deleting | RemoteState::Deleted => {
                info!(binding_id = %record.id, "remote binding is going away, waiting");
                return wait_processing(
                    ctx,
                    binding,
                    &name,
                    &namespace,
                    "RemoteDeleting",
                    "remote binding is being deleted".to_string(),
                )
                .await;
            }
            _ if should_rotate(binding, &record, parameters.as_ref(), &backing) => {
                info!(binding_id = %record.id, "rotating binding by delete and re-create");
                space.delete_binding(&record.id).await?;
                if let Some(cache) = &ctx.cache {
                    cache.invalidate(&owner);
                }
                let mut status = next_status(binding);
                status.state = ResourceState::Processing;
                status.last_modified_at = Some(Utc::now());
                set_ready_condition(
                    &mut status.conditions,
                    Condition::ready(
                        ConditionStatus::Unknown,
                        "Rotating",
                        "binding deleted for rotation, re-creating",
                    ),
                );
                patch_status(ctx, &name, &namespace, &status).await?;
                return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
            }
            _ if record.generation != Some(generation)
                || record.parameter_hash.as_deref() != Some(digest.as_str()) =>
            {
                // Metadata is all the platform lets us update on a binding.
                info!(binding_id = %record.id, "remote binding metadata stale, updating");
                space
                    .update_binding(
                        &record.id,
                        &BindingChanges {
                            owner: None,
                            generation: Some(generation),
                            parameter_hash: Some(digest.clone()),
                        },
                    )
                    .await?;
                mutated = true;
                refetch(ctx, space.as_ref(), &owner, &name).await?
            }
            _ => {
                debug!(binding_id = %record.id, "remote binding up to date");
                record
            }
        },
    };

    project_status(
        ctx, binding, &name, &namespace, generation, &digest, &backing, &record, mutated,
    )
    .await
}

/// The Ready ServiceInstance this binding binds, plus its workspace
struct BackingInstance {
    instance_id: String,
    instance_name: String,
    instance_digest: Option<String>,
    workspace: Box<dyn RemoteWorkspace>,
}

/// Resolve the backing instance; Err carries the wait reason and message
async fn resolve_backing(
    ctx: &Context,
    binding: &ServiceBinding,
    namespace: &str,
) -> Result<Result<BackingInstance, (&'static str, String)>, Error> {
    let instance_name = binding.spec.service_instance.clone();
    let Some(instance) = ctx.kube.get_instance(&instance_name, namespace).await? else {
        return Ok(Err((
            "InstanceNotReady",
            format!("service instance {instance_name} not found"),
        )));
    };

    let status = instance.status.as_ref();
    let instance_ready = status.map(|s| is_ready(&s.conditions)).unwrap_or(false);
    let instance_id = status.and_then(|s| s.instance_id.clone());
    let (true, Some(instance_id)) = (instance_ready, instance_id) else {
        return Ok(Err((
            "InstanceNotReady",
            format!("service instance {instance_name} is not ready"),
        )));
    };

    let Some(workspace) =
        fetch_workspace(ctx, &instance.spec.workspace, namespace).await?
    else {
        return Ok(Err((
            "WorkspaceNotReady",
            format!("workspace {} not found", instance.spec.workspace),
        )));
    };

    Ok(Ok(BackingInstance {
        instance_id,
        instance_name,
        instance_digest: status.and_then(|s| s.service_instance_digest.clone()),
        workspace,
    }))
}

/// Whether the binding must be replaced rather than updated
///
/// The stored parameter hash covers generation and parameters together, so
/// a pure generation bump also changes it. To tell real parameter changes
/// apart, the current parameters are re-hashed under the record's own
/// generation and compared against the record's hash.
fn should_rotate(
    binding: &ServiceBinding,
    record: &Binding,
    parameters: Option<&serde_json::Value>,
    backing: &BackingInstance,
) -> bool {
    let annotations = ReconcileAnnotations::new(binding.annotations());

    if annotations.rotate_on_parameter_change() {
        let parameters_changed = match (record.generation, record.parameter_hash.as_deref()) {
            (Some(gen), Some(hash)) => parameter_digest(gen, parameters) != hash,
            _ => true,
        };
        if parameters_changed {
            return true;
        }
    }

    if annotations.rotate_on_instance_change() {
        let observed = binding
            .status
            .as_ref()
            .and_then(|s| s.observed_instance_digest.as_deref());
        if let (Some(observed), Some(current)) = (observed, backing.instance_digest.as_deref()) {
            if observed != current {
                return true;
            }
        }
    }

    false
}

/// Post-mutation read-back; absence right after a create/update is fatal
async fn refetch(
    ctx: &Context,
    space: &dyn SpaceClient,
    owner: &str,
    name: &str,
) -> Result<Binding, Error> {
    if let Some(cache) = &ctx.cache {
        cache.invalidate(owner);
    }
    let record = space.get_binding_by_owner(owner).await?.ok_or_else(|| {
        Error::inconsistent(name, "remote binding absent right after create/update")
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
    binding: &ServiceBinding,
    name: &str,
    namespace: &str,
    owner: &str,
    generation: i64,
    digest: &str,
    orphan: &Binding,
    space: &dyn SpaceClient,
) -> Result<Action, Error> {
    if orphan.state != RemoteState::Ready {
        return Err(Error::inconsistent(
            name,
            format!(
                "orphaned remote binding {} is in state {} and cannot be adopted",
                orphan.id, orphan.state
            ),
        ));
    }
    info!(binding_id = %orphan.id, "adopting orphaned remote binding");
    space
        .update_binding(
            &orphan.id,
            &BindingChanges {
                owner: Some(owner.to_string()),
                generation: Some(generation),
                parameter_hash: Some(digest.to_string()),
            },
        )
        .await?;
    if let Some(cache) = &ctx.cache {
        cache.invalidate(owner);
    }

    let mut status = next_status(binding);
    status.state = ResourceState::Processing;
    status.binding_id = Some(orphan.id.clone());
    status.last_modified_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(
            ConditionStatus::Unknown,
            "Adopting",
            "orphaned remote binding adopted",
        ),
    );
    patch_status(ctx, name, namespace, &status).await?;
    Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)))
}

/// Project the final remote state into status; on Ready, also write the
/// credentials secret
#[allow(clippy::too_many_arguments)]
async fn project_status(
    ctx: &Context,
    binding: &ServiceBinding,
    name: &str,
    namespace: &str,
    generation: i64,
    digest: &str,
    backing: &BackingInstance,
    record: &Binding,
    mutated: bool,
) -> Result<Action, Error> {
    let annotations = ReconcileAnnotations::new(binding.annotations());
    let mut status = next_status(binding);
    status.binding_id = Some(record.id.clone());
    status.last_reconciled_at = Some(Utc::now());
    if mutated {
        status.last_modified_at = Some(Utc::now());
    }

    let action = match record.state {
        RemoteState::Ready => {
            materialize_secret(ctx, binding, name, namespace, backing, record, &mut status)
                .await?;
            status.observed_generation = generation;
            status.service_binding_digest = Some(digest.to_string());
            status.observed_instance_digest = backing.instance_digest.clone();
            status.state = ResourceState::Ready;
            set_ready_condition(
                &mut status.conditions,
                Condition::ready(ConditionStatus::True, "Ready", "service binding is ready"),
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
                    format!("remote binding is {}", record.state),
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
                    "remote binding is being deleted",
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
                    format!("remote binding is in terminal state {failed}"),
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

/// Write the target secret from the record's credentials
async fn materialize_secret(
    ctx: &Context,
    binding: &ServiceBinding,
    name: &str,
    namespace: &str,
    backing: &BackingInstance,
    record: &Binding,
    status: &mut ServiceBindingStatus,
) -> Result<(), Error> {
    let annotations = ReconcileAnnotations::new(binding.annotations());
    let credentials = record.credentials.as_ref().ok_or_else(|| {
        Error::platform(
            "fetch binding credentials",
            "ready remote binding carries no credentials",
        )
    })?;

    let descriptor = annotations.with_metadata().then(|| BindingDescriptor {
        binding_name: name.to_string(),
        binding_id: record.id.clone(),
        instance_name: backing.instance_name.clone(),
        instance_id: backing.instance_id.clone(),
    });
    let data = secret_payload(
        credentials,
        binding.spec.secret_key.as_deref(),
        descriptor.as_ref(),
    )?;

    // A renamed target leaves the old secret behind; clean it up first.
    if let Some(previous) = status.secret_name.as_deref() {
        if previous != binding.spec.secret_name {
            info!(%previous, "deleting stale credentials secret");
            ctx.kube.delete_secret(previous, namespace).await?;
        }
    }

    let owner_ref = binding
        .controller_owner_ref(&())
        .ok_or_else(|| Error::internal("binding has no metadata for an owner reference"))?;
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(binding.spec.secret_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    ctx.kube.apply_secret(&secret).await?;
    status.secret_name = Some(binding.spec.secret_name.clone());
    Ok(())
}

async fn handle_deletion(
    binding: &ServiceBinding,
    ctx: &Context,
    name: &str,
    namespace: &str,
    owner: &str,
) -> Result<Action, Error> {
    if !binding.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    if binding.finalizers().iter().any(|f| f != FINALIZER) {
        info!("deletion blocked by foreign finalizers");
        return wait_deleting(
            ctx,
            binding,
            name,
            namespace,
            "ForeignFinalizers",
            "waiting for foreign finalizers to be removed".to_string(),
        )
        .await;
    }

    // The target secret goes first, so no consumer is left holding
    // credentials for a binding that no longer exists remotely.
    let secret_name = binding
        .status
        .as_ref()
        .and_then(|s| s.secret_name.clone())
        .unwrap_or_else(|| binding.spec.secret_name.clone());
    if ctx.kube.get_secret(&secret_name, namespace).await?.is_some() {
        info!(secret = %secret_name, "deleting credentials secret before remote binding");
        ctx.kube.delete_secret(&secret_name, namespace).await?;
        return wait_deleting(
            ctx,
            binding,
            name,
            namespace,
            "DeletingSecret",
            "waiting for credentials secret deletion".to_string(),
        )
        .await;
    }

    let backing = match resolve_backing_for_deletion(ctx, binding, namespace).await? {
        Ok(space) => space,
        Err(message) => {
            return wait_deleting(ctx, binding, name, namespace, "WorkspaceNotReady", message)
                .await;
        }
    };

    // Deletion reads bypass the cache.
    match backing.get_binding_by_owner(owner).await? {
        Some(record) if record.state == RemoteState::Deleting => {
            debug!(binding_id = %record.id, "remote deletion already in progress");
            wait_deleting(
                ctx,
                binding,
                name,
                namespace,
                "Deleting",
                "waiting for remote binding deletion".to_string(),
            )
            .await
        }
        Some(record) => {
            info!(binding_id = %record.id, "deleting remote binding");
            backing.delete_binding(&record.id).await?;
            if let Some(cache) = &ctx.cache {
                cache.invalidate(owner);
            }
            wait_deleting(
                ctx,
                binding,
                name,
                namespace,
                "Deleting",
                "waiting for remote binding deletion".to_string(),
            )
            .await
        }
        None => {
            if let Some(cache) = &ctx.cache {
                cache.invalidate(owner);
            }
            ctx.kube.remove_binding_finalizer(name, namespace).await?;
            info!("service binding released");
            Ok(Action::await_change())
        }
    }
}

/// Resolve a space client for deletion; Err carries the wait message
async fn resolve_backing_for_deletion(
    ctx: &Context,
    binding: &ServiceBinding,
    namespace: &str,
) -> Result<Result<Arc<dyn SpaceClient>, String>, Error> {
    let instance_name = &binding.spec.service_instance;
    let Some(instance) = ctx.kube.get_instance(instance_name, namespace).await? else {
        return Err(Error::config(format!(
            "service instance {instance_name} not found while deleting binding"
        )));
    };
    let Some(workspace) = fetch_workspace(ctx, &instance.spec.workspace, namespace).await? else {
        return Err(Error::config(format!(
            "workspace {} not found while deleting binding",
            instance.spec.workspace
        )));
    };
    match gate_for_deletion(workspace.as_ref(), namespace) {
        WorkspaceGate::NotReady { message } => Ok(Err(message)),
        WorkspaceGate::Ready {
            space_id,
            organization,
            secret_name,
            secret_namespace,
        } => {
            let credentials =
                platform_credentials(ctx, &secret_name, &secret_namespace).await?;
            Ok(Ok(ctx
                .factory
                .space_client(&credentials, &organization, &space_id)?))
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
    binding: &ServiceBinding,
    namespace: &str,
) -> Result<Option<serde_json::Value>, Error> {
    let mut fragments = Vec::with_capacity(binding.spec.parameters_from.len());
    for source in &binding.spec.parameters_from {
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
    merge_with_fragments(binding.spec.parameters.as_ref(), &fragments)
}

fn processing_interval(annotations: &ReconcileAnnotations<'_>) -> Duration {
    annotations
        .reconcile_timeout()
        .unwrap_or(Duration::from_secs(REQUEUE_WAIT_SECS))
}

fn current_conditions(binding: &ServiceBinding) -> &[Condition] {
    binding
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or(&[])
}

fn next_status(binding: &ServiceBinding) -> ServiceBindingStatus {
    binding.status.clone().unwrap_or_default()
}

async fn patch_status(
    ctx: &Context,
    name: &str,
    namespace: &str,
    status: &ServiceBindingStatus,
) -> Result<(), Error> {
    ctx.kube.patch_binding_status(name, namespace, status).await
}

async fn wait_processing(
    ctx: &Context,
    binding: &ServiceBinding,
    name: &str,
    namespace: &str,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    let annotations = ReconcileAnnotations::new(binding.annotations());
    let mut status = next_status(binding);
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
    binding: &ServiceBinding,
    name: &str,
    namespace: &str,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    let mut status = next_status(binding);
    status.state = ResourceState::Deleting;
    status.last_reconciled_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::Unknown, reason, message),
    );
    patch_status(ctx, name, namespace, &status).await?;
    Ok(Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS)))
}

/// Deferred error projection: the only place Ready is forced to False
async fn record_error_status(binding: &ServiceBinding, ctx: &Context, err: &Error) {
    if binding.meta().deletion_timestamp.is_some()
        && !binding.finalizers().iter().any(|f| f == FINALIZER)
    {
        return;
    }
    let name = binding.name_any();
    let Some(namespace) = binding.namespace() else {
        return;
    };

    let reason = match err {
        Error::Config { .. } | Error::Secret { .. } => "ConfigurationError",
        Error::Inconsistent { .. } => "InconsistentState",
        Error::Platform { .. } => "PlatformError",
        _ => "ReconcileFailed",
    };

    let mut status = next_status(binding);
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

    fn bindings(&self, namespace: &str) -> Api<ServiceBinding> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_instance(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServiceInstance>, Error> {
        let api: Api<ServiceInstance> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(instance) => Ok(Some(instance)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

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
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal("secret has no name"))?;
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal("secret has no namespace"))?;
        let api = self.secrets(namespace);
        match api.get(name).await {
            Ok(existing) => {
                let mut replacement = secret.clone();
                replacement.metadata.resource_version = existing.metadata.resource_version;
                api.replace(name, &PostParams::default(), &replacement)
                    .await?;
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                api.create(&PostParams::default(), secret).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_binding_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ServiceBindingStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.bindings(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_binding_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api = self.bindings(namespace);
        let binding = api.get(name).await?;
        let mut finalizers = binding.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_binding_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api = self.bindings(namespace);
        let binding = api.get(name).await?;
        let mut finalizers = binding.metadata.finalizers.unwrap_or_default();
        finalizers.retain(|f| f != FINALIZER);
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_instance_label(
        &self,
        name: &str,
        namespace: &str,
        instance: &str,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": { "labels": { INSTANCE_LABEL: instance } }
        });
        self.bindings(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
