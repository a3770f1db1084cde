use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Row, TransactionBehavior, params};

use super::{SqliteDatabase, from_millis, parse_column, to_millis};
use crate::domain::{OutboxItemId, ScheduledTask, StoreError, TaskEnvelope, TaskId, TriggerName};
use crate::ports::TaskScheduler;

const COLUMNS: &str = "id, trigger_name, args, item_id, run_at, leased_until, deliveries";

struct TaskRow {
    id: String,
    trigger: String,
    args: String,
    item_id: Option<String>,
    run_at: i64,
    leased_until: Option<i64>,
    deliveries: i64,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            trigger: row.get(1)?,
            args: row.get(2)?,
            item_id: row.get(3)?,
            run_at: row.get(4)?,
            leased_until: row.get(5)?,
            deliveries: row.get(6)?,
        })
    }

    fn into_task(self) -> Result<ScheduledTask, StoreError> {
        let mut envelope =
            TaskEnvelope::new(TriggerName::new(self.trigger), serde_json::from_str(&self.args)?);
        if let Some(item_id) = self.item_id {
            envelope = envelope.for_item(parse_column("item_id", &item_id)?);
        }
        Ok(ScheduledTask {
            id: parse_column("id", &self.id)?,
            envelope,
            run_at: from_millis(self.run_at)?,
            leased_until: self.leased_until.map(from_millis).transpose()?,
            deliveries: self.deliveries.clamp(0, u32::MAX as i64) as u32,
        })
    }
}

fn collect_tasks(rows: Vec<TaskRow>) -> Result<Vec<ScheduledTask>, StoreError> {
    rows.into_iter().map(TaskRow::into_task).collect()
}

/// Durable delayed queue. `due_at` mirrors `leased_until` or `run_at` so one
/// index serves the lease query.
pub struct SqliteTaskScheduler {
    db: SqliteDatabase,
}

impl SqliteTaskScheduler {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskScheduler for SqliteTaskScheduler {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), StoreError> {
        let id = task.id.as_ulid().to_string();
        let trigger = task.envelope.trigger().as_str().to_string();
        let args = serde_json::to_string(task.envelope.args())?;
        let item_id = task.envelope.item_id().map(|id| id.as_ulid().to_string());
        let run_at = to_millis(task.run_at);
        let leased_until = task.leased_until.map(to_millis);
        let due_at = to_millis(task.due_at());
        let deliveries = i64::from(task.deliveries);
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO scheduled_tasks ({COLUMNS}, due_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![id, trigger, args, item_id, run_at, leased_until, deliveries, due_at],
                )?;
                Ok(())
            })
            .await
    }

    async fn lease_due(
        &self,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, StoreError> {
        let now_ms = to_millis(now);
        let visible_again = now_ms
            .saturating_add(i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX));
        let limit = limit.min(i64::MAX as usize) as i64;
        let rows = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut rows = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {COLUMNS} FROM scheduled_tasks
                         WHERE due_at <= ?1 ORDER BY due_at, id LIMIT ?2"
                    ))?;
                    stmt.query_map(params![now_ms, limit], TaskRow::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };
                for row in &mut rows {
                    tx.execute(
                        "UPDATE scheduled_tasks
                         SET leased_until = ?2, due_at = ?2, deliveries = deliveries + 1
                         WHERE id = ?1",
                        params![row.id, visible_again],
                    )?;
                    row.leased_until = Some(visible_again);
                    row.deliveries += 1;
                }
                tx.commit()?;
                Ok(rows)
            })
            .await?;
        collect_tasks(rows)
    }

    async fn ack(&self, id: TaskId) -> Result<bool, StoreError> {
        let id = id.as_ulid().to_string();
        self.db
            .call(move |conn| {
                let n = conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await
    }

    async fn cancel_for_item(&self, item_id: OutboxItemId) -> Result<usize, StoreError> {
        let item_id = item_id.as_ulid().to_string();
        self.db
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM scheduled_tasks WHERE item_id = ?1",
                    params![item_id],
                )?)
            })
            .await
    }

    async fn has_scheduled_for(&self, item_id: OutboxItemId) -> Result<bool, StoreError> {
        let item_id = item_id.as_ulid().to_string();
        self.db
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM scheduled_tasks WHERE item_id = ?1)",
                    params![item_id],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
    }

    async fn list(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let rows = self
            .db
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM scheduled_tasks ORDER BY due_at, id"
                ))?;
                let rows = stmt
                    .query_map([], TaskRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        collect_tasks(rows)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.db
            .call(|conn| {
                let n: i64 =
                    conn.query_row("SELECT COUNT(*) FROM scheduled_tasks", [], |row| row.get(0))?;
                Ok(n.max(0) as usize)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use ulid::Ulid;

    const VT: Duration = Duration::from_secs(600);

    fn task(run_at: DateTime<Utc>, item: Option<OutboxItemId>) -> ScheduledTask {
        let mut envelope = TaskEnvelope::new(
            "send-to-followers".into(),
            serde_json::json!({"item_id": "x", "offset": 100}),
        );
        if let Some(item) = item {
            envelope = envelope.for_item(item);
        }
        ScheduledTask::new(TaskId::from_ulid(Ulid::new()), envelope, run_at)
    }

    #[tokio::test]
    async fn lease_ack_and_redelivery() {
        let scheduler = SqliteDatabase::open_in_memory().await.unwrap().scheduler();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let due = task(now - ChronoDuration::seconds(1), None);
        let future = task(now + ChronoDuration::minutes(1), None);
        scheduler.schedule(due.clone()).await.unwrap();
        scheduler.schedule(future.clone()).await.unwrap();

        let leased = scheduler.lease_due(now, VT, 10).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, due.id);
        assert_eq!(leased[0].envelope, due.envelope);
        assert_eq!(leased[0].deliveries, 1);

        // still leased at +5 minutes; the future task is due by then
        let at = now + ChronoDuration::minutes(5);
        let leased = scheduler.lease_due(at, VT, 10).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, future.id);

        let at = now + ChronoDuration::minutes(10);
        let leased = scheduler.lease_due(at, VT, 10).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, due.id);
        assert_eq!(leased[0].deliveries, 2);

        assert!(scheduler.ack(due.id).await.unwrap());
        assert_eq!(scheduler.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancellation_by_item() {
        let scheduler = SqliteDatabase::open_in_memory().await.unwrap().scheduler();
        let now = Utc::now();
        let item = OutboxItemId::from_ulid(Ulid::new());
        scheduler.schedule(task(now, Some(item))).await.unwrap();
        scheduler.schedule(task(now, None)).await.unwrap();

        assert!(scheduler.has_scheduled_for(item).await.unwrap());
        assert_eq!(scheduler.cancel_for_item(item).await.unwrap(), 1);
        assert!(!scheduler.has_scheduled_for(item).await.unwrap());
        assert_eq!(scheduler.list().await.unwrap().len(), 1);
    }
}
