//! Operator-facing annotation surface
//!
//! Annotations tune per-resource reconciliation behavior. Unparseable
//! values fall back to the documented default with a warning rather than
//! failing the reconciliation.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

/// Delete and re-create a remote instance stuck in a failed state
pub const RECREATE_ON_FAILURE: &str = "strata.dev/recreate-on-failure";

/// Cap on consecutive retryable failures before terminal Error
pub const MAX_RETRIES: &str = "strata.dev/max-retries";

/// Requeue interval (seconds) while a resource is in a processing state
pub const RECONCILE_TIMEOUT: &str = "strata.dev/reconcile-timeout";

/// Requeue interval (seconds) while a resource is Ready
pub const READY_INTERVAL: &str = "strata.dev/ready-interval";

/// Requeue interval (seconds) after a terminal failure
pub const FAIL_INTERVAL: &str = "strata.dev/fail-interval";

/// Adopt an orphaned remote record matched by declared name
pub const ADOPT: &str = "strata.dev/adopt";

/// Delete and re-create a binding when its parameters change
pub const ROTATE_ON_PARAMETER_CHANGE: &str = "strata.dev/rotate-on-parameter-change";

/// Delete and re-create a binding when its backing instance changes
pub const ROTATE_ON_INSTANCE_CHANGE: &str = "strata.dev/rotate-on-instance-change";

/// Add a `.metadata` entry and descriptive fields to the credentials secret
pub const WITH_METADATA: &str = "strata.dev/with-metadata";

/// Typed view over a resource's annotation map
pub struct ReconcileAnnotations<'a> {
    annotations: &'a BTreeMap<String, String>,
}

impl<'a> ReconcileAnnotations<'a> {
    /// Wrap an annotation map
    pub fn new(annotations: &'a BTreeMap<String, String>) -> Self {
        Self { annotations }
    }

    fn bool_value(&self, key: &str) -> bool {
        match self.annotations.get(key) {
            None => false,
            Some(raw) => match raw.parse::<bool>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(annotation = key, value = %raw, "unparseable bool annotation, using false");
                    false
                }
            },
        }
    }

    fn seconds_value(&self, key: &str) -> Option<Duration> {
        let raw = self.annotations.get(key)?;
        match raw.parse::<u64>() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                warn!(annotation = key, value = %raw, "unparseable duration annotation, ignoring");
                None
            }
        }
    }

    /// Whether a failed remote instance should be replaced instead of updated
    pub fn recreate_on_failure(&self) -> bool {
        self.bool_value(RECREATE_ON_FAILURE)
    }

    /// Retry budget; None means unbounded
    pub fn max_retries(&self) -> Option<i64> {
        let raw = self.annotations.get(MAX_RETRIES)?;
        match raw.parse::<i64>() {
            Ok(n) if n > 0 => Some(n),
            Ok(_) | Err(_) => {
                warn!(annotation = MAX_RETRIES, value = %raw, "unparseable max-retries annotation, retries unbounded");
                None
            }
        }
    }

    /// Requeue interval while processing, if overridden
    pub fn reconcile_timeout(&self) -> Option<Duration> {
        self.seconds_value(RECONCILE_TIMEOUT)
    }

    /// Requeue interval while Ready, if overridden
    pub fn ready_interval(&self) -> Option<Duration> {
        self.seconds_value(READY_INTERVAL)
    }

    /// Requeue interval after terminal failure, if configured
    pub fn fail_interval(&self) -> Option<Duration> {
        self.seconds_value(FAIL_INTERVAL)
    }

    /// Whether orphan adoption is enabled
    pub fn adopt(&self) -> bool {
        self.bool_value(ADOPT)
    }

    /// Whether parameter changes rotate the binding
    pub fn rotate_on_parameter_change(&self) -> bool {
        self.bool_value(ROTATE_ON_PARAMETER_CHANGE)
    }

    /// Whether backing-instance changes rotate the binding
    pub fn rotate_on_instance_change(&self) -> bool {
        self.bool_value(ROTATE_ON_INSTANCE_CHANGE)
    }

    /// Whether the credentials secret carries descriptive metadata
    pub fn with_metadata(&self) -> bool {
        self.bool_value(WITH_METADATA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_absent() {
        let m = map(&[]);
        let a = ReconcileAnnotations::new(&m);
        assert!(!a.recreate_on_failure());
        assert!(!a.adopt());
        assert!(a.max_retries().is_none());
        assert!(a.ready_interval().is_none());
    }

    #[test]
    fn test_parses_valid_values() {
        let m = map(&[
            (ADOPT, "true"),
            (MAX_RETRIES, "5"),
            (READY_INTERVAL, "300"),
        ]);
        let a = ReconcileAnnotations::new(&m);
        assert!(a.adopt());
        assert_eq!(a.max_retries(), Some(5));
        assert_eq!(a.ready_interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_unparseable_values_fall_back_to_default() {
        let m = map(&[
            (ADOPT, "yes please"),
            (MAX_RETRIES, "many"),
            (FAIL_INTERVAL, "soon"),
        ]);
        let a = ReconcileAnnotations::new(&m);
        assert!(!a.adopt());
        assert!(a.max_retries().is_none());
        assert!(a.fail_interval().is_none());
    }

    #[test]
    fn test_non_positive_max_retries_means_unbounded() {
        let m = map(&[(MAX_RETRIES, "0")]);
        let a = ReconcileAnnotations::new(&m);
        assert!(a.max_retries().is_none());
    }
}
