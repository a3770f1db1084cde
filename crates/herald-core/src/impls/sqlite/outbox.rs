use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{SqliteDatabase, from_millis, parse_column, to_millis};
use crate::domain::{
    ActivityType, OutboxItem, OutboxItemId, OutboxStatus, StoreError, SupersededQuery,
};
use crate::ports::OutboxStore;

const COLUMNS: &str = "id, activity_type, object_reference, actor, visibility, status, \
                       follower_offset, payload, created_at, updated_at, invalidated_at";

/// Raw column values; converted to the domain type off the database thread.
struct ItemRow {
    id: String,
    activity_type: String,
    object_reference: String,
    actor: String,
    visibility: String,
    status: String,
    offset: Option<i64>,
    payload: String,
    created_at: i64,
    updated_at: i64,
    invalidated_at: Option<i64>,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            activity_type: row.get(1)?,
            object_reference: row.get(2)?,
            actor: row.get(3)?,
            visibility: row.get(4)?,
            status: row.get(5)?,
            offset: row.get(6)?,
            payload: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            invalidated_at: row.get(10)?,
        })
    }

    fn into_item(self) -> Result<OutboxItem, StoreError> {
        Ok(OutboxItem {
            id: parse_column("id", &self.id)?,
            activity_type: ActivityType::from(self.activity_type),
            object_reference: self.object_reference,
            actor: parse_column("actor", &self.actor)?,
            visibility: parse_column("visibility", &self.visibility)?,
            status: parse_column("status", &self.status)?,
            offset: self.offset.map(|o| o.max(0) as usize),
            payload: serde_json::from_str(&self.payload)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            invalidated_at: self.invalidated_at.map(from_millis).transpose()?,
        })
    }
}

/// Column values in `COLUMNS` order.
struct ItemParams {
    id: String,
    activity_type: String,
    object_reference: String,
    actor: &'static str,
    visibility: &'static str,
    status: &'static str,
    offset: Option<i64>,
    payload: String,
    created_at: i64,
    updated_at: i64,
    invalidated_at: Option<i64>,
}

impl ItemParams {
    fn from_item(item: &OutboxItem) -> Result<Self, StoreError> {
        Ok(Self {
            id: item.id.as_ulid().to_string(),
            activity_type: item.activity_type.as_str().to_string(),
            object_reference: item.object_reference.clone(),
            actor: item.actor.as_str(),
            visibility: item.visibility.as_str(),
            status: item.status.as_str(),
            offset: item.offset.map(|o| o as i64),
            payload: serde_json::to_string(&item.payload)?,
            created_at: to_millis(item.created_at),
            updated_at: to_millis(item.updated_at),
            invalidated_at: item.invalidated_at.map(to_millis),
        })
    }
}

fn collect_items(rows: Vec<ItemRow>) -> Result<Vec<OutboxItem>, StoreError> {
    rows.into_iter().map(ItemRow::into_item).collect()
}

pub struct SqliteOutboxStore {
    db: SqliteDatabase,
}

impl SqliteOutboxStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn insert(&self, item: &OutboxItem) -> Result<(), StoreError> {
        let p = ItemParams::from_item(item)?;
        self.db
            .call(move |conn| {
                let inserted = conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO outbox_items ({COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                    ),
                    params![
                        p.id,
                        p.activity_type,
                        p.object_reference,
                        p.actor,
                        p.visibility,
                        p.status,
                        p.offset,
                        p.payload,
                        p.created_at,
                        p.updated_at,
                        p.invalidated_at
                    ],
                )?;
                if inserted == 0 {
                    return Err(StoreError::Conflict(format!("outbox item {} exists", p.id)));
                }
                Ok(())
            })
            .await
    }

    async fn get(&self, id: OutboxItemId) -> Result<Option<OutboxItem>, StoreError> {
        let key = id.as_ulid().to_string();
        let row = self
            .db
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM outbox_items WHERE id = ?1"),
                        params![key],
                        ItemRow::from_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(ItemRow::into_item).transpose()
    }

    async fn save(&self, item: &OutboxItem) -> Result<(), StoreError> {
        let p = ItemParams::from_item(item)?;
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE outbox_items SET
                        activity_type = ?2, object_reference = ?3, actor = ?4,
                        visibility = ?5, status = ?6, follower_offset = ?7, payload = ?8,
                        created_at = ?9, updated_at = ?10, invalidated_at = ?11
                     WHERE id = ?1",
                    params![
                        p.id,
                        p.activity_type,
                        p.object_reference,
                        p.actor,
                        p.visibility,
                        p.status,
                        p.offset,
                        p.payload,
                        p.created_at,
                        p.updated_at,
                        p.invalidated_at
                    ],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound(p.id));
                }
                Ok(())
            })
            .await
    }

    async fn advance_offset(
        &self,
        id: OutboxItemId,
        from: usize,
        to: usize,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let key = id.as_ulid().to_string();
        let from = from as i64;
        let to = to as i64;
        let now = to_millis(now);
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE outbox_items SET follower_offset = ?3, updated_at = ?4
                     WHERE id = ?1 AND status = 'pending'
                       AND COALESCE(follower_offset, 0) = ?2",
                    params![key, from, to, now],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    async fn mark_published(
        &self,
        id: OutboxItemId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let key = id.as_ulid().to_string();
        let now = to_millis(now);
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE outbox_items
                     SET status = 'published', follower_offset = NULL, updated_at = ?2
                     WHERE id = ?1 AND status = 'pending'",
                    params![key, now],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    async fn find_superseded(
        &self,
        query: &SupersededQuery,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        let object = query.object_reference.clone();
        let kind = query
            .activity_type
            .as_ref()
            .map(|kind| kind.as_str().to_string());
        let rows = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM outbox_items
                     WHERE status = 'pending' AND object_reference = ?1
                       AND (?2 IS NULL OR activity_type = ?2)
                     ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map(params![object, kind], ItemRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        collect_items(rows)
    }

    async fn list_pending(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        let before = to_millis(updated_before);
        let limit = limit.min(i64::MAX as usize) as i64;
        let rows = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM outbox_items
                     WHERE status = 'pending' AND updated_at < ?1
                     ORDER BY id LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![before, limit], ItemRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        collect_items(rows)
    }

    async fn delete_published_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let cutoff = to_millis(cutoff);
        let limit = limit.min(i64::MAX as usize) as i64;
        self.db
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM outbox_items WHERE id IN (
                        SELECT id FROM outbox_items
                        WHERE status = 'published' AND updated_at < ?1
                        ORDER BY id LIMIT ?2
                     )",
                    params![cutoff, limit],
                )?;
                Ok(deleted)
            })
            .await
    }

    async fn count(&self, status: OutboxStatus) -> Result<usize, StoreError> {
        self.db
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM outbox_items WHERE status = ?1",
                    params![status.as_str()],
                    |row| row.get(0),
                )?;
                Ok(n.max(0) as usize)
            })
            .await
    }
}
