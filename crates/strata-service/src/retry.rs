//! Retry backoff for retryable platform failures
//!
//! The delay is seeded from the time elapsed since the Ready condition
//! last changed status. Because each failed pass requeues after the
//! current elapsed time, consecutive failures roughly double the wait,
//! bounded below at one second and above at one minute.

use std::time::Duration;

use chrono::{DateTime, Utc};
use strata_common::crd::{ready_condition, Condition};

/// Lower bound on the retry delay
pub const MIN_RETRY_DELAY_SECS: u64 = 1;

/// Upper bound on the retry delay
pub const MAX_RETRY_DELAY_SECS: u64 = 60;

/// Compute the next retry delay from the current condition list
///
/// Falls back to the minimum when no Ready condition exists yet or the
/// clock reads before the last transition.
pub fn retry_delay(conditions: &[Condition], now: DateTime<Utc>) -> Duration {
    let elapsed = ready_condition(conditions)
        .and_then(|c| now.signed_duration_since(c.last_transition_time).to_std().ok())
        .map(|e| e.as_secs())
        .unwrap_or(0);
    Duration::from_secs(elapsed.clamp(MIN_RETRY_DELAY_SECS, MAX_RETRY_DELAY_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use strata_common::crd::ConditionStatus;

    fn conditions_transitioned(seconds_ago: i64, now: DateTime<Utc>) -> Vec<Condition> {
        let mut c = Condition::ready(ConditionStatus::False, "PlatformError", "boom");
        c.last_transition_time = now - TimeDelta::seconds(seconds_ago);
        vec![c]
    }

    #[test]
    fn test_no_condition_uses_minimum() {
        assert_eq!(
            retry_delay(&[], Utc::now()),
            Duration::from_secs(MIN_RETRY_DELAY_SECS)
        );
    }

    #[test]
    fn test_delay_tracks_elapsed_time() {
        let now = Utc::now();
        assert_eq!(
            retry_delay(&conditions_transitioned(8, now), now),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_delay_is_capped_at_one_minute() {
        let now = Utc::now();
        assert_eq!(
            retry_delay(&conditions_transitioned(3600, now), now),
            Duration::from_secs(MAX_RETRY_DELAY_SECS)
        );
    }

    #[test]
    fn test_future_transition_uses_minimum() {
        let now = Utc::now();
        assert_eq!(
            retry_delay(&conditions_transitioned(-30, now), now),
            Duration::from_secs(MIN_RETRY_DELAY_SECS)
        );
    }
}
