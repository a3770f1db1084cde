use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{OutboxItemId, RetryBatch, RetryKey, StoreError};
use crate::ports::RetryStore;

#[derive(Default)]
pub struct InMemoryRetryStore {
    batches: Mutex<HashMap<RetryKey, RetryBatch>>,
}

impl InMemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryStore for InMemoryRetryStore {
    async fn put(&self, batch: &RetryBatch) -> Result<(), StoreError> {
        self.batches.lock().await.insert(batch.key, batch.clone());
        Ok(())
    }

    async fn get(&self, key: RetryKey, now: DateTime<Utc>) -> Result<Option<RetryBatch>, StoreError> {
        let batches = self.batches.lock().await;
        Ok(batches
            .get(&key)
            .filter(|batch| !batch.is_expired(now))
            .cloned())
    }

    async fn delete(&self, key: RetryKey) -> Result<bool, StoreError> {
        Ok(self.batches.lock().await.remove(&key).is_some())
    }

    async fn delete_for_item(&self, item_id: OutboxItemId) -> Result<usize, StoreError> {
        let mut batches = self.batches.lock().await;
        let before = batches.len();
        batches.retain(|_, batch| batch.item_id != item_id);
        Ok(before - batches.len())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut batches = self.batches.lock().await;
        let before = batches.len();
        batches.retain(|_, batch| !batch.is_expired(now));
        Ok(before - batches.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.batches.lock().await.len())
    }
}
