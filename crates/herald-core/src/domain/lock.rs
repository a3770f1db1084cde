use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A held named lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,

    /// Token of the acquirer; only it may release the lock.
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(key: impl Into<String>, holder: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            holder: holder.into(),
            acquired_at,
        }
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.holder == holder
    }

    /// A lock at least `stale_after` old may be taken over by any acquirer.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let stale_after = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.acquired_at) >= stale_after
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    Acquired,

    /// A stale holder was replaced.
    TookOver { previous: DateTime<Utc> },

    /// Someone else holds a fresh lock.
    Held { since: DateTime<Utc> },
}
