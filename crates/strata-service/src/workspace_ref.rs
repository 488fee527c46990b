//! Readiness gate over the workspace a service resource lives in

use strata_common::crd::{is_ready, RemoteWorkspace};

/// Outcome of checking the backing workspace of an instance or binding
pub(crate) enum WorkspaceGate {
    /// The workspace is Ready and its remote id is known
    Ready {
        /// Remote workspace id
        space_id: String,
        /// Remote organization name
        organization: String,
        /// Credentials secret name
        secret_name: String,
        /// Credentials secret namespace
        secret_namespace: String,
    },
    /// The workspace exists but cannot serve dependents yet
    NotReady {
        /// Condition message
        message: String,
    },
}

/// Check whether a fetched workspace can serve dependent resources
pub(crate) fn gate(ws: &dyn RemoteWorkspace, fallback_namespace: &str) -> WorkspaceGate {
    if ws.is_deleting() {
        return WorkspaceGate::NotReady {
            message: format!("workspace {} is being deleted", ws.name()),
        };
    }
    gate_for_deletion(ws, fallback_namespace)
}

/// Gate variant for a dependent's own teardown
///
/// A workspace being deleted together with its dependents is still
/// functional: its finalizer holds the remote space until the dependent
/// count reaches zero. Refusing to serve it here would leave workspace
/// and dependent waiting on each other forever.
pub(crate) fn gate_for_deletion(
    ws: &dyn RemoteWorkspace,
    fallback_namespace: &str,
) -> WorkspaceGate {
    let status = ws.status();
    let ready = status.map(|s| is_ready(&s.conditions)).unwrap_or(false);
    let space_id = status.and_then(|s| s.space_id.clone());

    match (ready, space_id) {
        (true, Some(space_id)) => {
            let (secret_name, secret_namespace) = ws.credentials_secret();
            WorkspaceGate::Ready {
                space_id,
                organization: ws.organization_name().to_string(),
                secret_name,
                secret_namespace: secret_namespace
                    .unwrap_or_else(|| fallback_namespace.to_string()),
            }
        }
        _ => WorkspaceGate::NotReady {
            message: format!("workspace {} is not ready", ws.name()),
        },
    }
}
