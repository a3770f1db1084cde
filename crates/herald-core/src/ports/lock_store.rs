//! LockStore port - 名前付きロック（lease）の永続化
//!
//! # 設計原則
//! - try_acquire は test-and-set（同時に二人が取れてはいけない）
//! - staleness window を過ぎたロックは誰でも奪える（落ちた worker 対策）
//! - release は holder token が一致するときだけ効く（奪われた後の解放で新しい holder を消さない）

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Acquire, LockRecord, StoreError};

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Acquire, StoreError>;

    /// Removes the lock if `holder` still owns it. Returns whether a lock
    /// was actually removed.
    async fn release(&self, key: &str, holder: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, StoreError>;

    async fn purge_stale(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<usize, StoreError>;
}
