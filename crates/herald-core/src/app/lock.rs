//! LockManager - staleness 付きの名前付きロック
//!
//! acquire → 本体実行 → release を 1 つの呼び出しにまとめる。
//! 本体は別 task で走らせるので、panic してもロックは必ず解放される。
//! 解放は実行ごとの holder token 付きなので、stale 扱いで奪われた後に
//! 元の holder が戻ってきても新しい holder のロックは消えない。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::domain::{Acquire, PipelineError, StoreError};
use crate::ports::{Clock, LockStore};

/// Result of a locked run.
#[derive(Debug, PartialEq)]
pub enum LockOutcome<T> {
    Ran(T),

    /// Another holder has had the lock since `since`; nothing ran.
    Contended { since: DateTime<Utc> },
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, stale_after: Duration) -> Self {
        Self {
            store,
            clock,
            stale_after,
        }
    }

    /// Lock key of a callback family. Arguments are not part of the key.
    pub fn key_for(trigger: &str) -> String {
        format!("batch-lock:{trigger}")
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Whether a fresh (non-stale) lock is held under `key`.
    pub async fn is_held(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get(key)
            .await?
            .is_some_and(|record| !record.is_stale(now, self.stale_after)))
    }

    pub async fn run_locked<F, T>(&self, key: &str, body: F) -> Result<LockOutcome<T>, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
        T: Send + 'static,
    {
        let now = self.clock.now();
        let holder = Ulid::new().to_string();
        match self.store.try_acquire(key, &holder, now, self.stale_after).await? {
            Acquire::Held { since } => {
                debug!(lock = key, since = %since, "lock held, skipping");
                return Ok(LockOutcome::Contended { since });
            }
            Acquire::TookOver { previous } => {
                warn!(lock = key, previous = %previous, "took over stale lock");
            }
            Acquire::Acquired => {
                debug!(lock = key, "lock acquired");
            }
        }

        let joined = tokio::spawn(body).await;

        match self.store.release(key, &holder).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = key, "lock was taken over before release"),
            // staleness takes care of it eventually
            Err(e) => warn!(lock = key, error = %e, "failed to release lock"),
        }

        match joined {
            Ok(result) => result.map(LockOutcome::Ran),
            Err(e) => Err(PipelineError::StepPanicked(e.to_string())),
        }
    }
}
