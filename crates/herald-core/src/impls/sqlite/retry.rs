use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{SqliteDatabase, from_millis, parse_column, to_millis};
use crate::domain::{OutboxItemId, RetryBatch, RetryKey, StoreError};
use crate::ports::RetryStore;

struct BatchRow {
    key: String,
    item_id: String,
    endpoints: String,
    attempt: i64,
    created_at: i64,
    expires_at: i64,
}

impl BatchRow {
    fn into_batch(self) -> Result<RetryBatch, StoreError> {
        Ok(RetryBatch {
            key: parse_column("key", &self.key)?,
            item_id: parse_column("item_id", &self.item_id)?,
            endpoints: serde_json::from_str(&self.endpoints)?,
            attempt: self.attempt.clamp(0, u32::MAX as i64) as u32,
            created_at: from_millis(self.created_at)?,
            expires_at: from_millis(self.expires_at)?,
        })
    }
}

pub struct SqliteRetryStore {
    db: SqliteDatabase,
}

impl SqliteRetryStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RetryStore for SqliteRetryStore {
    async fn put(&self, batch: &RetryBatch) -> Result<(), StoreError> {
        let key = batch.key.as_ulid().to_string();
        let item_id = batch.item_id.as_ulid().to_string();
        let endpoints = serde_json::to_string(&batch.endpoints)?;
        let attempt = i64::from(batch.attempt);
        let created_at = to_millis(batch.created_at);
        let expires_at = to_millis(batch.expires_at);
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO retry_batches
                        (key, item_id, endpoints, attempt, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![key, item_id, endpoints, attempt, created_at, expires_at],
                )?;
                Ok(())
            })
            .await
    }

    async fn get(&self, key: RetryKey, now: DateTime<Utc>) -> Result<Option<RetryBatch>, StoreError> {
        let key = key.as_ulid().to_string();
        let now = to_millis(now);
        let row = self
            .db
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT key, item_id, endpoints, attempt, created_at, expires_at
                         FROM retry_batches WHERE key = ?1 AND expires_at > ?2",
                        params![key, now],
                        |row| {
                            Ok(BatchRow {
                                key: row.get(0)?,
                                item_id: row.get(1)?,
                                endpoints: row.get(2)?,
                                attempt: row.get(3)?,
                                created_at: row.get(4)?,
                                expires_at: row.get(5)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;
        row.map(BatchRow::into_batch).transpose()
    }

    async fn delete(&self, key: RetryKey) -> Result<bool, StoreError> {
        let key = key.as_ulid().to_string();
        self.db
            .call(move |conn| {
                let n = conn.execute("DELETE FROM retry_batches WHERE key = ?1", params![key])?;
                Ok(n > 0)
            })
            .await
    }

    async fn delete_for_item(&self, item_id: OutboxItemId) -> Result<usize, StoreError> {
        let item_id = item_id.as_ulid().to_string();
        self.db
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM retry_batches WHERE item_id = ?1",
                    params![item_id],
                )?)
            })
            .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let now = to_millis(now);
        self.db
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM retry_batches WHERE expires_at <= ?1",
                    params![now],
                )?)
            })
            .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.db
            .call(|conn| {
                let n: i64 =
                    conn.query_row("SELECT COUNT(*) FROM retry_batches", [], |row| row.get(0))?;
                Ok(n.max(0) as usize)
            })
            .await
    }
}
