//! Retry batches and the backoff policy that schedules them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OutboxItemId, RetryKey};

/// Endpoints that failed with a retryable error during one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBatch {
    pub key: RetryKey,
    pub item_id: OutboxItemId,
    pub endpoints: Vec<String>,
    /// 1-based retry number this batch will be delivered as.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RetryBatch {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What to do with endpoints that just failed with a retryable error.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Deliver again as retry number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },

    /// Give up on these endpoints for this cycle.
    Drop { reason: String },
}

/// Quadratic backoff with a hard attempt ceiling.
///
/// Attempt numbering counts the initial delivery as attempt 0; retry `n`
/// runs `n² × base_delay` after the failure that caused it. With the default
/// policy an endpoint gets three deliveries: the initial one, a retry after
/// one hour, and a retry four hours after that.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,

    /// Total deliveries per endpoint and cycle, the initial one included.
    pub max_attempts: u32,

    /// How long a stored retry batch stays valid.
    pub ttl: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60 * 60),
            max_attempts: 3,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Decide the follow-up for a failure observed on attempt `failed_attempt`.
    pub fn decide(&self, failed_attempt: u32) -> RetryDecision {
        let next = failed_attempt.saturating_add(1);
        if next >= self.max_attempts {
            RetryDecision::Drop {
                reason: format!(
                    "retry ceiling reached: {}/{} deliveries",
                    next, self.max_attempts
                ),
            }
        } else {
            RetryDecision::Retry {
                attempt: next,
                delay: self.delay_for(next),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HOUR: u64 = 60 * 60;

    #[rstest]
    #[case::first_retry(1, 1)]
    #[case::second_retry(2, 4)]
    #[case::third_retry(3, 9)]
    fn delay_is_quadratic_in_hours(#[case] attempt: u32, #[case] hours: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(attempt), Duration::from_secs(hours * HOUR));
    }

    #[test]
    fn initial_failure_schedules_first_retry_in_an_hour() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(HOUR)
            }
        );
    }

    #[test]
    fn first_retry_failure_schedules_second_in_four_hours() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry {
                attempt: 2,
                delay: Duration::from_secs(4 * HOUR)
            }
        );
    }

    #[test]
    fn second_retry_failure_is_dropped() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(2), RetryDecision::Drop { .. }));
        assert!(matches!(policy.decide(7), RetryDecision::Drop { .. }));
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert!(matches!(policy.decide(0), RetryDecision::Drop { .. }));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let batch = RetryBatch {
            key: RetryKey::from_ulid(ulid::Ulid::new()),
            item_id: OutboxItemId::from_ulid(ulid::Ulid::new()),
            endpoints: vec!["https://r/inbox".into()],
            attempt: 1,
            created_at: now,
            expires_at: now,
        };
        assert!(batch.is_expired(now));
        assert!(!batch.is_expired(now - chrono::Duration::seconds(1)));
    }
}
