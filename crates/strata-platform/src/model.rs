//! Typed domain records returned by the remote resource facade

use serde::{Deserialize, Serialize};

/// Type of the asynchronous last operation reported by the platform
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Provisioning
    Create,
    /// Reconfiguration
    Update,
    /// Deprovisioning
    Delete,
}

/// Outcome of the asynchronous last operation
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Accepted but not started
    Initial,
    /// Running
    InProgress,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

/// The platform's last-operation record on an instance or binding
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LastOperation {
    /// Operation type
    #[serde(rename = "type")]
    pub type_: OperationType,
    /// Operation outcome so far
    pub state: OperationState,
}

/// Normalized lifecycle state of a remote record
///
/// The nine-way collapse of {create,update,delete} x
/// {initial/in-progress,succeeded,failed}. Closed enum; every consumer
/// matches exhaustively.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum RemoteState {
    /// Create accepted or running
    Creating,
    /// Last create or update succeeded
    Ready,
    /// Create finished with an error
    CreateFailed,
    /// Update accepted or running
    Updating,
    /// Update finished with an error
    UpdateFailed,
    /// Delete accepted or running
    Deleting,
    /// Delete succeeded (record about to vanish)
    Deleted,
    /// Delete finished with an error
    DeleteFailed,
    /// No last operation reported
    #[default]
    Unknown,
}

impl RemoteState {
    /// Derive the normalized state from a last-operation record
    pub fn from_last_operation(op: Option<LastOperation>) -> Self {
        let Some(op) = op else {
            return Self::Unknown;
        };
        match (op.type_, op.state) {
            (OperationType::Create, OperationState::Initial | OperationState::InProgress) => {
                Self::Creating
            }
            (OperationType::Create, OperationState::Succeeded) => Self::Ready,
            (OperationType::Create, OperationState::Failed) => Self::CreateFailed,
            (OperationType::Update, OperationState::Initial | OperationState::InProgress) => {
                Self::Updating
            }
            (OperationType::Update, OperationState::Succeeded) => Self::Ready,
            (OperationType::Update, OperationState::Failed) => Self::UpdateFailed,
            (OperationType::Delete, OperationState::Initial | OperationState::InProgress) => {
                Self::Deleting
            }
            (OperationType::Delete, OperationState::Succeeded) => Self::Deleted,
            (OperationType::Delete, OperationState::Failed) => Self::DeleteFailed,
        }
    }

    /// Whether the record's last operation finished with an error
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed | Self::UpdateFailed | Self::DeleteFailed
        )
    }
}

impl std::fmt::Display for RemoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "Creating",
            Self::Ready => "Ready",
            Self::CreateFailed => "CreateFailed",
            Self::Updating => "Updating",
            Self::UpdateFailed => "UpdateFailed",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
            Self::DeleteFailed => "DeleteFailed",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// A remote workspace (organizational container)
#[derive(Clone, Debug, PartialEq)]
pub struct Space {
    /// Remote id
    pub id: String,
    /// Remote name
    pub name: String,
    /// Owner token label, if the record is managed by this operator
    pub owner: Option<String>,
    /// Local generation mirrored at the last successful apply
    pub generation: Option<i64>,
}

/// A remote service instance
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    /// Remote id
    pub id: String,
    /// Remote name
    pub name: String,
    /// Owner token label, if the record is managed by this operator
    pub owner: Option<String>,
    /// Local generation mirrored at the last successful apply
    pub generation: Option<i64>,
    /// Parameter digest mirrored at the last successful apply
    pub parameter_hash: Option<String>,
    /// Remote plan id
    pub plan_id: Option<String>,
    /// Tags on the remote instance
    pub tags: Vec<String>,
    /// Normalized lifecycle state
    pub state: RemoteState,
}

/// A remote service credential binding
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    /// Remote id
    pub id: String,
    /// Remote name
    pub name: String,
    /// Owner token label, if the record is managed by this operator
    pub owner: Option<String>,
    /// Local generation mirrored at the last successful apply
    pub generation: Option<i64>,
    /// Parameter digest mirrored at the last successful apply
    pub parameter_hash: Option<String>,
    /// Normalized lifecycle state
    pub state: RemoteState,
    /// Credentials payload, present once the binding is Ready
    pub credentials: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(type_: OperationType, state: OperationState) -> Option<LastOperation> {
        Some(LastOperation { type_, state })
    }

    #[test]
    fn test_nine_way_collapse() {
        use OperationState::*;
        use OperationType::*;
        assert_eq!(
            RemoteState::from_last_operation(op(Create, InProgress)),
            RemoteState::Creating
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Create, Succeeded)),
            RemoteState::Ready
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Create, Failed)),
            RemoteState::CreateFailed
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Update, InProgress)),
            RemoteState::Updating
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Update, Succeeded)),
            RemoteState::Ready
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Update, Failed)),
            RemoteState::UpdateFailed
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Delete, InProgress)),
            RemoteState::Deleting
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Delete, Succeeded)),
            RemoteState::Deleted
        );
        assert_eq!(
            RemoteState::from_last_operation(op(Delete, Failed)),
            RemoteState::DeleteFailed
        );
    }

    #[test]
    fn test_initial_counts_as_in_progress() {
        assert_eq!(
            RemoteState::from_last_operation(op(OperationType::Create, OperationState::Initial)),
            RemoteState::Creating
        );
    }

    #[test]
    fn test_missing_operation_is_unknown() {
        assert_eq!(RemoteState::from_last_operation(None), RemoteState::Unknown);
    }

    #[test]
    fn test_failed_states() {
        assert!(RemoteState::CreateFailed.is_failed());
        assert!(RemoteState::UpdateFailed.is_failed());
        assert!(RemoteState::DeleteFailed.is_failed());
        assert!(!RemoteState::Ready.is_failed());
        assert!(!RemoteState::Deleting.is_failed());
    }
}
