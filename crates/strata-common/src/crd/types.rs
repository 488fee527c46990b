//! Supporting status types shared by all Strata CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type used for the reconciliation outcome summary
pub const CONDITION_READY: &str = "Ready";

/// Tri-state status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (currently only Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Create a Ready condition with the current timestamp
    pub fn ready(
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(CONDITION_READY, status, reason, message)
    }
}

/// Human-readable summary state derived from the Ready condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ResourceState {
    /// Reconciliation is in progress
    #[default]
    Processing,
    /// The resource is being deleted
    Deleting,
    /// The remote counterpart exists and is ready
    Ready,
    /// Reconciliation failed
    Error,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "Processing"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Upsert the Ready condition in a condition list
///
/// The lastTransitionTime is preserved when the status does not change, so
/// the retry backoff (which is seeded from the time since the last Ready
/// transition) keeps growing across repeated failures.
pub fn set_ready_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.type_ == condition.type_)
    {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Find the Ready condition in a condition list
pub fn ready_condition(conditions: &[Condition]) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == CONDITION_READY)
}

/// Whether a condition list reports Ready=True
pub fn is_ready(conditions: &[Condition]) -> bool {
    ready_condition(conditions).map(|c| c.status == ConditionStatus::True) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ready_condition_inserts_when_absent() {
        let mut conditions = Vec::new();
        set_ready_condition(
            &mut conditions,
            Condition::ready(ConditionStatus::Unknown, "FirstSeen", "first reconcile"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "FirstSeen");
    }

    #[test]
    fn test_set_ready_condition_preserves_transition_time_on_same_status() {
        let mut conditions = vec![Condition::ready(
            ConditionStatus::False,
            "CreateFailed",
            "first failure",
        )];
        let original_time = conditions[0].last_transition_time;

        set_ready_condition(
            &mut conditions,
            Condition::ready(ConditionStatus::False, "CreateFailed", "second failure"),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message, "second failure");
        assert_eq!(conditions[0].last_transition_time, original_time);
    }

    #[test]
    fn test_set_ready_condition_bumps_transition_time_on_status_change() {
        let mut conditions = vec![Condition::ready(
            ConditionStatus::Unknown,
            "Provisioning",
            "creating",
        )];
        let original_time = conditions[0].last_transition_time;

        set_ready_condition(
            &mut conditions,
            Condition::ready(ConditionStatus::True, "Ready", "ready"),
        );

        assert!(conditions[0].last_transition_time >= original_time);
        assert!(is_ready(&conditions));
    }

    #[test]
    fn test_is_ready_false_without_condition() {
        assert!(!is_ready(&[]));
    }
}
