//! RetryStore port - 再送待ちの宛先リスト（短命、TTL 付き）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{OutboxItemId, RetryBatch, RetryKey, StoreError};

#[async_trait]
pub trait RetryStore: Send + Sync {
    async fn put(&self, batch: &RetryBatch) -> Result<(), StoreError>;

    /// Expired batches read as missing.
    async fn get(&self, key: RetryKey, now: DateTime<Utc>) -> Result<Option<RetryBatch>, StoreError>;

    async fn delete(&self, key: RetryKey) -> Result<bool, StoreError>;

    async fn delete_for_item(&self, item_id: OutboxItemId) -> Result<usize, StoreError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
