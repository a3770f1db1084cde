use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Acquire, LockRecord, StoreError};
use crate::ports::LockStore;

/// Test-and-set happens under a single mutex.
#[derive(Default)]
pub struct InMemoryLockStore {
    locks: Mutex<HashMap<String, LockRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Acquire, StoreError> {
        let mut locks = self.locks.lock().await;
        let outcome = match locks.get(key) {
            None => Acquire::Acquired,
            Some(held) if held.is_stale(now, stale_after) => Acquire::TookOver {
                previous: held.acquired_at,
            },
            Some(held) => {
                return Ok(Acquire::Held {
                    since: held.acquired_at,
                });
            }
        };
        locks.insert(key.to_string(), LockRecord::new(key, holder, now));
        Ok(outcome)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some(lock) if lock.is_held_by(holder) => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, StoreError> {
        Ok(self.locks.lock().await.get(key).cloned())
    }

    async fn purge_stale(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<usize, StoreError> {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_stale(now, stale_after));
        Ok(before - locks.len())
    }
}
