use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{OutboxItem, OutboxItemId, OutboxStatus, StoreError, SupersededQuery};
use crate::ports::OutboxStore;

/// Items keyed by id; ULID order doubles as creation order.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    items: Mutex<BTreeMap<OutboxItemId, OutboxItem>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every item, oldest first.
    pub async fn all(&self) -> Vec<OutboxItem> {
        self.items.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, item: &OutboxItem) -> Result<(), StoreError> {
        let mut items = self.items.lock().await;
        if items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("outbox item {} exists", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get(&self, id: OutboxItemId) -> Result<Option<OutboxItem>, StoreError> {
        Ok(self.items.lock().await.get(&id).cloned())
    }

    async fn save(&self, item: &OutboxItem) -> Result<(), StoreError> {
        let mut items = self.items.lock().await;
        match items.get_mut(&item.id) {
            Some(slot) => {
                *slot = item.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(item.id.to_string())),
        }
    }

    async fn advance_offset(
        &self,
        id: OutboxItemId,
        from: usize,
        to: usize,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut items = self.items.lock().await;
        match items.get_mut(&id) {
            Some(item) if item.is_pending() && item.offset.unwrap_or(0) == from => {
                item.advance_offset(to, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_published(
        &self,
        id: OutboxItemId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut items = self.items.lock().await;
        match items.get_mut(&id) {
            Some(item) if item.is_pending() => {
                item.mark_published(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_superseded(
        &self,
        query: &SupersededQuery,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        let items = self.items.lock().await;
        Ok(items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .collect())
    }

    async fn list_pending(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        let items = self.items.lock().await;
        Ok(items
            .values()
            .filter(|item| item.is_pending() && item.updated_at < updated_before)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_published_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let mut items = self.items.lock().await;
        let doomed: Vec<OutboxItemId> = items
            .values()
            .filter(|item| item.status == OutboxStatus::Published && item.updated_at < cutoff)
            .take(limit)
            .map(|item| item.id)
            .collect();
        for id in &doomed {
            items.remove(id);
        }
        Ok(doomed.len())
    }

    async fn count(&self, status: OutboxStatus) -> Result<usize, StoreError> {
        let items = self.items.lock().await;
        Ok(items.values().filter(|item| item.status == status).count())
    }
}
