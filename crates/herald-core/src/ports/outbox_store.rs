//! OutboxStore port - outbox item の正本（source of truth）
//!
//! # 実装
//! - InMemoryOutboxStore（テスト・開発用）
//! - SqliteOutboxStore（本番用、feature = "sqlite"）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{OutboxItem, OutboxItemId, OutboxStatus, StoreError, SupersededQuery};

/// 単一 writer で read-after-write 一貫性があればよい。
/// ジョブをまたぐトランザクションは不要（各ジョブは自分の item だけを書き換える）。
/// 配送側の状態更新は条件付き（pending のときだけ）で、並行する invalidation を上書きしない。
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Fails with `StoreError::Conflict` if the id already exists.
    async fn insert(&self, item: &OutboxItem) -> Result<(), StoreError>;

    async fn get(&self, id: OutboxItemId) -> Result<Option<OutboxItem>, StoreError>;

    /// Overwrites an existing item; `StoreError::NotFound` if it is missing.
    async fn save(&self, item: &OutboxItem) -> Result<(), StoreError>;

    /// Moves the follower offset of a pending item from `from` to `to`.
    /// Returns false, changing nothing, when the item is gone, no longer
    /// pending, or its offset is not `from` (an unset offset counts as 0).
    async fn advance_offset(
        &self,
        id: OutboxItemId,
        from: usize,
        to: usize,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Marks a pending item published and clears its offset. Returns false
    /// when the item is gone or no longer pending.
    async fn mark_published(
        &self,
        id: OutboxItemId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Pending items matching the invalidation lookup, oldest first.
    async fn find_superseded(
        &self,
        query: &SupersededQuery,
    ) -> Result<Vec<OutboxItem>, StoreError>;

    /// Pending items last touched before `updated_before`, oldest first.
    async fn list_pending(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxItem>, StoreError>;

    /// Deletes up to `limit` published items last touched before `cutoff`.
    async fn delete_published_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, StoreError>;

    async fn count(&self, status: OutboxStatus) -> Result<usize, StoreError>;
}
