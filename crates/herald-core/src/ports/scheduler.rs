//! TaskScheduler port - 永続的な遅延タスクキュー
//!
//! 「時刻 T 以降にこの trigger を引数付きで実行する」を保証する。
//!
//! # 設計原則
//! - at-least-once: lease 後 ack されなければ visibility timeout 後に再配送
//! - 明示的な ack
//! - item 単位の cancel（invalidation 用）

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{OutboxItemId, ScheduledTask, StoreError, TaskId};

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), StoreError>;

    /// Leases up to `limit` due tasks, earliest first. Leased tasks become
    /// due again at `now + visibility_timeout` unless acked.
    async fn lease_due(
        &self,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, StoreError>;

    /// Removes a finished task. Returns false if it was already gone.
    async fn ack(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Drops every task tied to `item_id`.
    async fn cancel_for_item(&self, item_id: OutboxItemId) -> Result<usize, StoreError>;

    async fn has_scheduled_for(&self, item_id: OutboxItemId) -> Result<bool, StoreError>;

    /// Every task, ordered by due time.
    async fn list(&self) -> Result<Vec<ScheduledTask>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.list().await?.len())
    }
}
