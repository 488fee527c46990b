//! Workspace/ClusterWorkspace controller implementation
//!
//! The reconciler compares the declared workspace against the remote
//! record correlated by owner token, then creates, updates, deletes, or
//! waits. A workspace pinned to a pre-existing remote id is never mutated,
//! only health-checked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use strata_common::annotations::ReconcileAnnotations;
use strata_common::crd::{
    set_ready_condition, ready_condition, ClusterWorkspace, Condition, ConditionStatus,
    RemoteWorkspace, ResourceState, ServiceInstance, Workspace, WorkspaceKind, WorkspaceStatus,
};
use strata_common::{
    Error, FINALIZER, REQUEUE_IMMEDIATE_SECS, REQUEUE_WAIT_SECS, SECRET_FINALIZER, WORKSPACE_LABEL,
};
use strata_platform::cache::space_by_owner;
use strata_platform::{ClientFactory, Credentials, HttpClientFactory, ResourceCache, Space};

const FIELD_MANAGER: &str = "strata-workspace-controller";

/// Trait abstracting Kubernetes client operations for workspaces
///
/// Allows mocking the Kubernetes side in tests while using the real
/// client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Patch the status of a workspace of either kind
    async fn patch_workspace_status<'a>(
        &self,
        kind: WorkspaceKind,
        name: &str,
        namespace: Option<&'a str>,
        status: &WorkspaceStatus,
    ) -> Result<(), Error>;

    /// Add the Strata finalizer to a workspace
    async fn add_workspace_finalizer<'a>(
        &self,
        kind: WorkspaceKind,
        name: &str,
        namespace: Option<&'a str>,
    ) -> Result<(), Error>;

    /// Remove the Strata finalizer from a workspace
    async fn remove_workspace_finalizer<'a>(
        &self,
        kind: WorkspaceKind,
        name: &str,
        namespace: Option<&'a str>,
    ) -> Result<(), Error>;

    /// Get a Secret by name and namespace
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Add the credentials-in-use finalizer to a secret (no-op if present)
    async fn add_secret_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the credentials-in-use finalizer from a secret
    async fn remove_secret_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Count ServiceInstances labeled as living in the given workspace
    ///
    /// A namespaced workspace only counts instances in its own namespace;
    /// a cluster workspace counts across all namespaces.
    async fn count_dependent_instances<'a>(
        &self,
        workspace: &str,
        namespace: Option<&'a str>,
    ) -> Result<usize, Error>;
}

/// Shared context for workspace reconciliations
pub struct Context {
    /// Kubernetes operations
    pub kube: Arc<dyn KubeClient>,
    /// Platform client construction
    pub factory: Arc<dyn ClientFactory>,
    /// Best-effort cache over remote space records
    pub cache: Option<Arc<ResourceCache<Space>>>,
}

impl Context {
    /// Create a production context from a Kubernetes client
    pub fn new(client: Client, cache: Option<Arc<ResourceCache<Space>>>) -> Self {
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

/// Reconcile a namespaced Workspace
#[instrument(skip(workspace, ctx), fields(workspace = %workspace.name_any()))]
pub async fn reconcile(workspace: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_any(workspace.as_ref(), &ctx).await
}

/// Reconcile a cluster-scoped ClusterWorkspace
#[instrument(skip(workspace, ctx), fields(workspace = %workspace.name_any()))]
pub async fn reconcile_cluster(
    workspace: Arc<ClusterWorkspace>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    reconcile_any(workspace.as_ref(), &ctx).await
}

/// Requeue policy on reconciliation errors
pub fn error_policy(workspace: Arc<Workspace>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(?err, workspace = %workspace.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS))
}

/// Requeue policy on ClusterWorkspace reconciliation errors
pub fn error_policy_cluster(
    workspace: Arc<ClusterWorkspace>,
    err: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(?err, workspace = %workspace.name_any(), "reconciliation failed");
    Action::requeue(Duration::from_secs(REQUEUE_WAIT_SECS))
}

/// Shared state machine over both workspace kinds
///
/// All errors funnel through the deferred status update here, so the Ready
/// condition is forced to False even on early return paths.
async fn reconcile_any(ws: &dyn RemoteWorkspace, ctx: &Context) -> Result<Action, Error> {
    match run(ws, ctx).await {
        Ok(action) => Ok(action),
        Err(err) => {
            record_error_status(ws, ctx, &err).await;
            Err(err)
        }
    }
}

async fn run(ws: &dyn RemoteWorkspace, ctx: &Context) -> Result<Action, Error> {
    let name = ws.name();
    info!(kind = %ws.kind(), "reconciling workspace");

    let owner = ws
        .uid()
        .ok_or_else(|| Error::internal("workspace has no uid"))?;

    if ws.is_deleting() {
        return handle_deletion(ws, ctx, &owner).await;
    }

    // First sight: a status update alone does not retrigger reconciliation,
    // so requeue explicitly after recording FirstSeen.
    if ready_condition(ws.status().map(|s| s.conditions.as_slice()).unwrap_or(&[])).is_none() {
        let mut status = next_status(ws);
        status.state = ResourceState::Processing;
        set_ready_condition(
            &mut status.conditions,
            Condition::ready(ConditionStatus::Unknown, "FirstSeen", "first reconciliation"),
        );
        patch_status(ws, ctx, &status).await?;
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
    }

    if !ws.finalizers().iter().any(|f| f == FINALIZER) {
        debug!("adding finalizer");
        ctx.kube
            .add_workspace_finalizer(ws.kind(), &name, ws.namespace().as_deref())
            .await?;
        return Ok(Action::requeue(Duration::from_secs(REQUEUE_IMMEDIATE_SECS)));
    }

    let credentials = resolve_credentials(ws, ctx).await?;
    let (secret_name, secret_namespace) = ws.credentials_secret();
    if let Some(ns) = &secret_namespace {
        ctx.kube.add_secret_finalizer(&secret_name, ns).await?;
    }

    let mut mutated = false;
    let space_id = if let Some(pinned) = ws.workspace_id() {
        // Pre-existing workspace: never create or update, only verify.
        pinned.to_string()
    } else {
        let org = ctx
            .factory
            .organization_client(&credentials, ws.organization_name())?;
        let space = apply_space(
            ws,
            &owner,
            &name,
            org.as_ref(),
            ctx.cache.as_deref(),
            &mut mutated,
        )
        .await?;
        org.add_developer(&space.id, &credentials.username).await?;
        space.id
    };

    // A workspace is not Ready until the remote side answers a plain GET.
    // Health-check failure is an error, never a silent Unknown.
    ctx.factory
        .health_checker(&credentials, ws.organization_name())?
        .check(&space_id)
        .await?;

    let mut status = next_status(ws);
    status.observed_generation = ws.generation();
    status.space_id = Some(space_id);
    status.state = ResourceState::Ready;
    status.last_reconciled_at = Some(Utc::now());
    if mutated {
        status.last_modified_at = Some(Utc::now());
    }
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::True, "Ready", "workspace is ready"),
    );
    patch_status(ws, ctx, &status).await?;

    Ok(Action::requeue(ws.ready_interval()))
}

/// Converge the remote space record with the declared workspace
async fn apply_space(
    ws: &dyn RemoteWorkspace,
    owner: &str,
    name: &str,
    org: &dyn strata_platform::OrganizationClient,
    cache: Option<&ResourceCache<Space>>,
    mutated: &mut bool,
) -> Result<Space, Error> {
    match space_by_owner(cache, org, owner).await? {
        None => {
            info!("remote workspace not found, creating");
            org.create_space(name, owner, ws.generation()).await?;
            *mutated = true;
        }
        Some(space) if space.generation != Some(ws.generation()) => {
            // Organization is immutable; only the name can drift.
            info!(space_id = %space.id, "remote workspace stale, updating");
            org.update_space(&space.id, name, owner, ws.generation())
                .await?;
            *mutated = true;
        }
        Some(space) => {
            debug!(space_id = %space.id, "remote workspace up to date");
            return Ok(space);
        }
    }

    // Never assume the record is immediately consistent after a mutation;
    // re-read directly and refresh the cached record.
    if let Some(cache) = cache {
        cache.invalidate(owner);
    }
    let space = org.get_space_by_owner(owner).await?.ok_or_else(|| {
        Error::inconsistent(name, "remote workspace absent right after create/update")
    })?;
    if let Some(cache) = cache {
        cache.insert(owner, space.clone());
    }
    Ok(space)
}

async fn handle_deletion(
    ws: &dyn RemoteWorkspace,
    ctx: &Context,
    owner: &str,
) -> Result<Action, Error> {
    let name = ws.name();

    if !ws.finalizers().iter().any(|f| f == FINALIZER) {
        // Nothing left to clean up; the resource is about to vanish.
        return Ok(Action::await_change());
    }

    let dependents = ctx
        .kube
        .count_dependent_instances(&name, ws.namespace().as_deref())
        .await?;
    if dependents > 0 {
        info!(dependents, "deletion blocked by dependent service instances");
        return wait_deleting(
            ws,
            ctx,
            "DeletionBlocked",
            format!("{dependents} dependent service instance(s) still exist"),
        )
        .await;
    }

    if ws.finalizers().iter().any(|f| f != FINALIZER) {
        info!("deletion blocked by foreign finalizers");
        return wait_deleting(
            ws,
            ctx,
            "ForeignFinalizers",
            "waiting for foreign finalizers to be removed".to_string(),
        )
        .await;
    }

    let (secret_name, secret_namespace) = ws.credentials_secret();

    // A pinned pre-existing workspace is not ours to delete.
    if ws.workspace_id().is_none() {
        let credentials = resolve_credentials(ws, ctx).await?;
        let org = ctx
            .factory
            .organization_client(&credentials, ws.organization_name())?;

        // Deletion reads bypass the cache; a stale record must never stop
        // a teardown, and a removed one must not linger in the cache.
        if let Some(cache) = &ctx.cache {
            cache.invalidate(owner);
        }
        if let Some(space) = org.get_space_by_owner(owner).await? {
            info!(space_id = %space.id, "deleting remote workspace");
            org.delete_space(&space.id).await?;
            return wait_deleting(
                ws,
                ctx,
                "Deleting",
                "waiting for remote workspace deletion".to_string(),
            )
            .await;
        }
    }

    // Remote record confirmed absent: release the credentials secret and
    // let the resource go. The final status write is skipped deliberately;
    // the object is about to be garbage-collected.
    if let Some(ns) = &secret_namespace {
        ctx.kube.remove_secret_finalizer(&secret_name, ns).await?;
    }
    ctx.kube
        .remove_workspace_finalizer(ws.kind(), &name, ws.namespace().as_deref())
        .await?;
    info!("workspace released");
    Ok(Action::await_change())
}

async fn wait_deleting(
    ws: &dyn RemoteWorkspace,
    ctx: &Context,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    let mut status = next_status(ws);
    status.state = ResourceState::Deleting;
    status.last_reconciled_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::Unknown, reason, message),
    );
    patch_status(ws, ctx, &status).await?;
    Ok(Action::requeue(wait_interval(ws)))
}

fn wait_interval(ws: &dyn RemoteWorkspace) -> Duration {
    ReconcileAnnotations::new(ws.annotations())
        .reconcile_timeout()
        .unwrap_or(Duration::from_secs(REQUEUE_WAIT_SECS))
}

fn next_status(ws: &dyn RemoteWorkspace) -> WorkspaceStatus {
    ws.status().cloned().unwrap_or_default()
}

async fn patch_status(
    ws: &dyn RemoteWorkspace,
    ctx: &Context,
    status: &WorkspaceStatus,
) -> Result<(), Error> {
    ctx.kube
        .patch_workspace_status(ws.kind(), &ws.name(), ws.namespace().as_deref(), status)
        .await
}

/// Deferred error projection: the only place Ready is forced to False
async fn record_error_status(ws: &dyn RemoteWorkspace, ctx: &Context, err: &Error) {
    // Skip the write when the resource is already being garbage-collected;
    // it would only produce conflict noise.
    if ws.is_deleting() && !ws.finalizers().iter().any(|f| f == FINALIZER) {
        return;
    }

    let reason = match err {
        Error::Config { .. } | Error::Secret { .. } => "ConfigurationError",
        Error::Inconsistent { .. } => "InconsistentState",
        Error::Platform { .. } => "PlatformError",
        _ => "ReconcileFailed",
    };

    let mut status = next_status(ws);
    status.state = ResourceState::Error;
    status.last_reconciled_at = Some(Utc::now());
    set_ready_condition(
        &mut status.conditions,
        Condition::ready(ConditionStatus::False, reason, err.to_string()),
    );
    if let Err(patch_err) = patch_status(ws, ctx, &status).await {
        warn!(error = %patch_err, "failed to record error status");
    }
}

async fn resolve_credentials(ws: &dyn RemoteWorkspace, ctx: &Context) -> Result<Credentials, Error> {
    let (name, namespace) = ws.credentials_secret();
    let namespace = namespace
        .ok_or_else(|| Error::config("credentials secret namespace cannot be resolved"))?;
    let secret = ctx
        .kube
        .get_secret(&name, &namespace)
        .await?
        .ok_or_else(|| Error::secret(&name, &namespace, "not found"))?;
    let data = secret
        .data
        .ok_or_else(|| Error::secret(&name, &namespace, "has no data"))?;
    Credentials::from_secret_data(&name, &namespace, &data)
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

    async fn patch_finalizers<K>(
        api: &Api<K>,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_workspace_status<'a>(
        &self,
        kind: WorkspaceKind,
        name: &str,
        namespace: Option<&'a str>,
        status: &WorkspaceStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        let params = PatchParams::apply(FIELD_MANAGER);
        match kind {
            WorkspaceKind::Namespaced => {
                let namespace =
                    namespace.ok_or_else(|| Error::internal("workspace without namespace"))?;
                let api: Api<Workspace> = Api::namespaced(self.client.clone(), namespace);
                api.patch_status(name, &params, &Patch::Merge(&patch)).await?;
            }
            WorkspaceKind::Cluster => {
                let api: Api<ClusterWorkspace> = Api::all(self.client.clone());
                api.patch_status(name, &params, &Patch::Merge(&patch)).await?;
            }
        }
        Ok(())
    }

    async fn add_workspace_finalizer<'a>(
        &self,
        kind: WorkspaceKind,
        name: &str,
        namespace: Option<&'a str>,
    ) -> Result<(), Error> {
        match kind {
            WorkspaceKind::Namespaced => {
                let namespace =
                    namespace.ok_or_else(|| Error::internal("workspace without namespace"))?;
                let api: Api<Workspace> = Api::namespaced(self.client.clone(), namespace);
                let ws = api.get(name).await?;
                let mut finalizers = ws.metadata.finalizers.unwrap_or_default();
                if finalizers.iter().any(|f| f == FINALIZER) {
                    return Ok(());
                }
                finalizers.push(FINALIZER.to_string());
                Self::patch_finalizers(&api, name, finalizers).await
            }
            WorkspaceKind::Cluster => {
                let api: Api<ClusterWorkspace> = Api::all(self.client.clone());
                let ws = api.get(name).await?;
                let mut finalizers = ws.metadata.finalizers.unwrap_or_default();
                if finalizers.iter().any(|f| f == FINALIZER) {
                    return Ok(());
                }
                finalizers.push(FINALIZER.to_string());
                Self::patch_finalizers(&api, name, finalizers).await
            }
        }
    }

    async fn remove_workspace_finalizer<'a>(
        &self,
        kind: WorkspaceKind,
        name: &str,
        namespace: Option<&'a str>,
    ) -> Result<(), Error> {
        match kind {
            WorkspaceKind::Namespaced => {
                let namespace =
                    namespace.ok_or_else(|| Error::internal("workspace without namespace"))?;
                let api: Api<Workspace> = Api::namespaced(self.client.clone(), namespace);
                let ws = api.get(name).await?;
                let mut finalizers = ws.metadata.finalizers.unwrap_or_default();
                finalizers.retain(|f| f != FINALIZER);
                Self::patch_finalizers(&api, name, finalizers).await
            }
            WorkspaceKind::Cluster => {
                let api: Api<ClusterWorkspace> = Api::all(self.client.clone());
                let ws = api.get(name).await?;
                let mut finalizers = ws.metadata.finalizers.unwrap_or_default();
                finalizers.retain(|f| f != FINALIZER);
                Self::patch_finalizers(&api, name, finalizers).await
            }
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

    async fn add_secret_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        let mut finalizers = secret.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == SECRET_FINALIZER) {
            return Ok(());
        }
        finalizers.push(SECRET_FINALIZER.to_string());
        Self::patch_finalizers(&api, name, finalizers).await
    }

    async fn remove_secret_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut finalizers = secret.metadata.finalizers.unwrap_or_default();
        finalizers.retain(|f| f != SECRET_FINALIZER);
        Self::patch_finalizers(&api, name, finalizers).await
    }

    async fn count_dependent_instances<'a>(
        &self,
        workspace: &str,
        namespace: Option<&'a str>,
    ) -> Result<usize, Error> {
        let api: Api<ServiceInstance> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(&format!("{WORKSPACE_LABEL}={workspace}"));
        let instances = api.list(&params).await?;
        Ok(instances.items.len())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::ByteString;
    use mockall::mock;
    use mockall::predicate::eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use strata_common::crd::WorkspaceSpec;
    use strata_platform::{HealthChecker, OrganizationClient, SpaceClient};

    // Local mocks for the platform traits; the mockall-generated mocks are
    // only available within the strata-platform crate's test configuration.
    mock! {
        pub Org {}

        #[async_trait]
        impl OrganizationClient for Org {
            async fn get_space_by_owner(&self, owner: &str) -> Result<Option<Space>, Error>;
            async fn get_space_by_name(&self, name: &str) -> Result<Option<Space>, Error>;
            async fn list_spaces(&self) -> Result<Vec<Space>, Error>;
            async fn create_space(&self, name: &str, owner: &str, generation: i64) -> Result<(), Error>;
            async fn update_space(&self, id: &str, name: &str, owner: &str, generation: i64) -> Result<(), Error>;
            async fn delete_space(&self, id: &str) -> Result<(), Error>;
            async fn add_developer(&self, space_id: &str, username: &str) -> Result<(), Error>;
        }
    }

    mock! {
        pub Health {}

        #[async_trait]
        impl HealthChecker for Health {
            async fn check(&self, space_id: &str) -> Result<(), Error>;
        }
    }

    /// Test factory handing out pre-built mocks
    struct StubFactory {
        org: Mutex<Option<Arc<MockOrg>>>,
        health: Mutex<Option<Arc<MockHealth>>>,
    }

    impl StubFactory {
        fn new(org: MockOrg, health: MockHealth) -> Self {
            Self {
                org: Mutex::new(Some(Arc::new(org))),
                health: Mutex::new(Some(Arc::new(health))),
            }
        }
    }

    impl ClientFactory for StubFactory {
        fn organization_client(
            &self,
            _credentials: &Credentials,
            _organization: &str,
        ) -> Result<Arc<dyn OrganizationClient>, Error> {
            Ok(self
                .org
                .lock()
                .expect("factory lock poisoned")
                .take()
                .expect("organization client requested twice"))
        }

        fn space_client(
            &self,
            _credentials: &Credentials,
            _organization: &str,
            _space_id: &str,
        ) -> Result<Arc<dyn SpaceClient>, Error> {
            unimplemented!("workspace reconciler never builds a space client")
        }

        fn health_checker(
            &self,
            _credentials: &Credentials,
            _organization: &str,
        ) -> Result<Arc<dyn HealthChecker>, Error> {
            Ok(self
                .health
                .lock()
                .expect("factory lock poisoned")
                .take()
                .expect("health checker requested twice"))
        }
    }

    fn credentials_secret() -> Secret {
        let mut data = BTreeMap::new();
        data.insert(
            "url".to_string(),
            ByteString(b"https://platform.example.com".to_vec()),
        );
        data.insert("username".to_string(), ByteString(b"alice".to_vec()));
        data.insert("password".to_string(), ByteString(b"pw".to_vec()));
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    fn sample_workspace(name: &str) -> Workspace {
        let mut ws = Workspace::new(
            name,
            WorkspaceSpec {
                organization_name: "my-org".to_string(),
                credentials_secret: "platform-creds".to_string(),
                workspace_id: None,
                ready_interval_seconds: None,
            },
        );
        ws.metadata.namespace = Some("team-a".to_string());
        ws.metadata.uid = Some("uid-1234".to_string());
        ws.metadata.generation = Some(1);
        ws.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        ws
    }

    fn seen_workspace(name: &str) -> Workspace {
        let mut ws = sample_workspace(name);
        let mut status = WorkspaceStatus::default();
        set_ready_condition(
            &mut status.conditions,
            Condition::ready(ConditionStatus::Unknown, "FirstSeen", "first reconciliation"),
        );
        ws.status = Some(status);
        ws
    }

    fn ready_space(generation: i64) -> Space {
        Space {
            id: "space-1".to_string(),
            name: "dev-space".to_string(),
            owner: Some("uid-1234".to_string()),
            generation: Some(generation),
        }
    }

    fn mock_kube_for_happy_path() -> MockKubeClient {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, _| Ok(Some(credentials_secret())));
        kube.expect_add_secret_finalizer().returning(|_, _| Ok(()));
        kube.expect_patch_workspace_status()
            .returning(|_, _, _, _| Ok(()));
        kube
    }

    fn passing_health() -> MockHealth {
        let mut health = MockHealth::new();
        health.expect_check().returning(|_| Ok(()));
        health
    }

    mod lifecycle {
        use super::*;

        /// Story: the first time the controller sees a workspace it records
        /// FirstSeen and requeues immediately; the status write alone would
        /// not retrigger reconciliation.
        #[tokio::test]
        async fn story_first_sight_records_first_seen() {
            let ws = Arc::new(sample_workspace("dev-space"));
            let captured = Arc::new(Mutex::new(Vec::<WorkspaceStatus>::new()));
            let captured_clone = Arc::clone(&captured);

            let mut kube = MockKubeClient::new();
            kube.expect_patch_workspace_status()
                .returning(move |_, _, _, status| {
                    captured_clone
                        .lock()
                        .expect("capture lock poisoned")
                        .push(status.clone());
                    Ok(())
                });

            let ctx = Arc::new(Context::for_testing(
                Arc::new(kube),
                Arc::new(StubFactory::new(MockOrg::new(), MockHealth::new())),
            ));

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::requeue(Duration::from_secs(1)));

            let statuses = captured.lock().expect("capture lock poisoned");
            let ready = ready_condition(&statuses[0].conditions).expect("ready condition");
            assert_eq!(ready.status, ConditionStatus::Unknown);
            assert_eq!(ready.reason, "FirstSeen");
        }

        /// Story: no remote record exists, so the controller creates one,
        /// re-fetches it, grants the developer role, health-checks, and
        /// declares Ready.
        #[tokio::test]
        async fn story_missing_remote_workspace_is_created() {
            let ws = Arc::new(seen_workspace("dev-space"));

            let mut org = MockOrg::new();
            let mut lookups = 0;
            org.expect_get_space_by_owner().returning(move |_| {
                lookups += 1;
                if lookups == 1 {
                    Ok(None)
                } else {
                    Ok(Some(ready_space(1)))
                }
            });
            org.expect_create_space()
                .with(eq("dev-space"), eq("uid-1234"), eq(1))
                .times(1)
                .returning(|_, _, _| Ok(()));
            org.expect_add_developer()
                .with(eq("space-1"), eq("alice"))
                .times(1)
                .returning(|_, _| Ok(()));

            let ctx = Arc::new(Context::for_testing(
                Arc::new(mock_kube_for_happy_path()),
                Arc::new(StubFactory::new(org, passing_health())),
            ));

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        }

        /// Story: the remote record carries a stale generation annotation,
        /// so the controller updates it (name only) and re-fetches.
        #[tokio::test]
        async fn story_stale_generation_triggers_update() {
            let mut ws = seen_workspace("dev-space");
            ws.metadata.generation = Some(3);
            let ws = Arc::new(ws);

            let mut org = MockOrg::new();
            let mut lookups = 0;
            org.expect_get_space_by_owner().returning(move |_| {
                lookups += 1;
                if lookups == 1 {
                    Ok(Some(ready_space(1)))
                } else {
                    Ok(Some(ready_space(3)))
                }
            });
            org.expect_update_space()
                .with(eq("space-1"), eq("dev-space"), eq("uid-1234"), eq(3))
                .times(1)
                .returning(|_, _, _, _| Ok(()));
            org.expect_create_space().times(0);
            org.expect_add_developer().returning(|_, _| Ok(()));

            let ctx = Arc::new(Context::for_testing(
                Arc::new(mock_kube_for_happy_path()),
                Arc::new(StubFactory::new(org, passing_health())),
            ));

            reconcile(ws, ctx).await.expect("reconcile should succeed");
        }

        /// Story: when the remote record already matches the declared state,
        /// a second pass issues no mutating calls at all.
        #[tokio::test]
        async fn story_reconcile_is_idempotent() {
            let ws = Arc::new(seen_workspace("dev-space"));

            let mut org = MockOrg::new();
            org.expect_get_space_by_owner()
                .returning(|_| Ok(Some(ready_space(1))));
            org.expect_create_space().times(0);
            org.expect_update_space().times(0);
            org.expect_add_developer().returning(|_, _| Ok(()));

            let ctx = Arc::new(Context::for_testing(
                Arc::new(mock_kube_for_happy_path()),
                Arc::new(StubFactory::new(org, passing_health())),
            ));

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        }

        /// Story: a record vanishing right after its own create is a fatal
        /// inconsistency, surfaced as an error rather than retried silently.
        #[tokio::test]
        async fn story_vanished_after_create_is_fatal() {
            let ws = Arc::new(seen_workspace("dev-space"));

            let mut org = MockOrg::new();
            org.expect_get_space_by_owner().returning(|_| Ok(None));
            org.expect_create_space().returning(|_, _, _| Ok(()));

            let ctx = Arc::new(Context::for_testing(
                Arc::new(mock_kube_for_happy_path()),
                Arc::new(StubFactory::new(org, MockHealth::new())),
            ));

            let err = reconcile(ws, ctx).await.expect_err("must fail");
            assert!(matches!(err, Error::Inconsistent { .. }));
        }

        /// Story: a spec pinning a pre-existing remote workspace skips
        /// create/update entirely and only health-checks.
        #[tokio::test]
        async fn story_pinned_workspace_is_only_health_checked() {
            let mut ws = seen_workspace("dev-space");
            ws.spec.workspace_id = Some("space-77".to_string());
            let ws = Arc::new(ws);

            let mut health = MockHealth::new();
            health
                .expect_check()
                .with(eq("space-77"))
                .times(1)
                .returning(|_| Ok(()));

            // No organization client expectations: requesting one would panic.
            let ctx = Arc::new(Context::for_testing(
                Arc::new(mock_kube_for_happy_path()),
                Arc::new(StubFactory::new(MockOrg::new(), health)),
            ));

            reconcile(ws, ctx).await.expect("reconcile should succeed");
        }

        /// Story: with a space cache wired, the steady-state lookup is
        /// served by one list sweep instead of a per-workspace read.
        #[tokio::test]
        async fn story_cached_lookup_skips_direct_read() {
            let ws = Arc::new(seen_workspace("dev-space"));

            let mut org = MockOrg::new();
            org.expect_list_spaces()
                .times(1)
                .returning(|| Ok(vec![ready_space(1)]));
            org.expect_get_space_by_owner().times(0);
            org.expect_create_space().times(0);
            org.expect_update_space().times(0);
            org.expect_add_developer().returning(|_, _| Ok(()));

            let ctx = Arc::new(Context {
                kube: Arc::new(mock_kube_for_happy_path()),
                factory: Arc::new(StubFactory::new(org, passing_health())),
                cache: Some(Arc::new(ResourceCache::new(Duration::from_secs(60)))),
            });

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        }

        /// Story: a failing health check surfaces as an error condition,
        /// not a silent Unknown.
        #[tokio::test]
        async fn story_health_check_failure_is_error() {
            let ws = Arc::new(seen_workspace("dev-space"));

            let mut org = MockOrg::new();
            org.expect_get_space_by_owner()
                .returning(|_| Ok(Some(ready_space(1))));
            org.expect_add_developer().returning(|_, _| Ok(()));

            let mut health = MockHealth::new();
            health
                .expect_check()
                .returning(|_| Err(Error::platform("health check", "connection refused")));

            let ctx = Arc::new(Context::for_testing(
                Arc::new(mock_kube_for_happy_path()),
                Arc::new(StubFactory::new(org, health)),
            ));

            let err = reconcile(ws, ctx).await.expect_err("must fail");
            assert!(matches!(err, Error::Platform { .. }));
        }
    }

    mod deletion {
        use super::*;

        fn deleting_workspace(name: &str) -> Workspace {
            let mut ws = seen_workspace(name);
            ws.metadata.deletion_timestamp = Some(Time(Utc::now()));
            ws
        }

        /// Story: a workspace with dependent service instances never
        /// receives a remote delete call.
        #[tokio::test]
        async fn story_deletion_blocked_by_dependents() {
            let ws = Arc::new(deleting_workspace("dev-space"));

            let mut kube = MockKubeClient::new();
            kube.expect_count_dependent_instances()
                .returning(|_, _| Ok(2));
            kube.expect_patch_workspace_status()
                .returning(|_, _, _, status| {
                    assert_eq!(status.state, ResourceState::Deleting);
                    let ready = ready_condition(&status.conditions).expect("ready condition");
                    assert_eq!(ready.reason, "DeletionBlocked");
                    Ok(())
                });

            let mut org = MockOrg::new();
            org.expect_delete_space().times(0);

            let ctx = Arc::new(Context::for_testing(
                Arc::new(kube),
                Arc::new(StubFactory::new(org, MockHealth::new())),
            ));

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        }

        /// Story: once dependents reach zero, the next pass issues exactly
        /// one remote delete and keeps the finalizer until absence is
        /// confirmed.
        #[tokio::test]
        async fn story_unblocked_deletion_issues_one_delete() {
            let ws = Arc::new(deleting_workspace("dev-space"));

            let mut kube = mock_kube_for_happy_path();
            kube.expect_count_dependent_instances()
                .returning(|_, _| Ok(0));
            kube.expect_remove_workspace_finalizer().times(0);

            let mut org = MockOrg::new();
            org.expect_get_space_by_owner()
                .returning(|_| Ok(Some(ready_space(1))));
            org.expect_delete_space()
                .with(eq("space-1"))
                .times(1)
                .returning(|_| Ok(()));

            let ctx = Arc::new(Context::for_testing(
                Arc::new(kube),
                Arc::new(StubFactory::new(org, MockHealth::new())),
            ));

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        }

        /// Story: with the remote record confirmed absent, the controller
        /// releases the credentials secret and drops its own finalizer.
        #[tokio::test]
        async fn story_confirmed_absence_releases_finalizers() {
            let ws = Arc::new(deleting_workspace("dev-space"));

            let mut kube = mock_kube_for_happy_path();
            kube.expect_count_dependent_instances()
                .returning(|_, _| Ok(0));
            kube.expect_remove_secret_finalizer()
                .with(eq("platform-creds"), eq("team-a"))
                .times(1)
                .returning(|_, _| Ok(()));
            kube.expect_remove_workspace_finalizer()
                .times(1)
                .returning(|_, _, _| Ok(()));

            let mut org = MockOrg::new();
            org.expect_get_space_by_owner().returning(|_| Ok(None));
            org.expect_delete_space().times(0);

            let ctx = Arc::new(Context::for_testing(
                Arc::new(kube),
                Arc::new(StubFactory::new(org, MockHealth::new())),
            ));

            let action = reconcile(ws, ctx).await.expect("reconcile should succeed");
            assert_eq!(action, Action::await_change());
        }
    }
}
