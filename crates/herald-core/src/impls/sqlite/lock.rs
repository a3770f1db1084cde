use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior, params};

use super::{SqliteDatabase, from_millis, to_millis};
use crate::domain::{Acquire, LockRecord, StoreError};
use crate::ports::LockStore;

fn stale_cutoff(now: DateTime<Utc>, stale_after: Duration) -> i64 {
    let window = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
    to_millis(now).saturating_sub(window)
}

/// Locks live in the `locks` table. Acquisition runs in an IMMEDIATE
/// transaction so the read and the write are one step, across processes too.
pub struct SqliteLockStore {
    db: SqliteDatabase,
}

impl SqliteLockStore {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<Acquire, StoreError> {
        let key = key.to_string();
        let holder = holder.to_string();
        let now_ms = to_millis(now);
        let cutoff = stale_cutoff(now, stale_after);
        let (held_since, took) = self
            .db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let held: Option<i64> = tx
                    .query_row(
                        "SELECT acquired_at FROM locks WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                match held {
                    Some(acquired_at) if acquired_at > cutoff => Ok((Some(acquired_at), false)),
                    previous => {
                        tx.execute(
                            "INSERT OR REPLACE INTO locks (key, holder, acquired_at)
                             VALUES (?1, ?2, ?3)",
                            params![key, holder, now_ms],
                        )?;
                        tx.commit()?;
                        Ok((previous, previous.is_some()))
                    }
                }
            })
            .await?;

        match (held_since, took) {
            (Some(previous), true) => Ok(Acquire::TookOver {
                previous: from_millis(previous)?,
            }),
            (Some(since), false) => Ok(Acquire::Held {
                since: from_millis(since)?,
            }),
            (None, _) => Ok(Acquire::Acquired),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let holder = holder.to_string();
        self.db
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM locks WHERE key = ?1 AND holder = ?2",
                    params![key, holder],
                )?;
                Ok(n > 0)
            })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, StoreError> {
        let lookup = key.to_string();
        let row = self
            .db
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT holder, acquired_at FROM locks WHERE key = ?1",
                        params![lookup],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                    )
                    .optional()?)
            })
            .await?;
        row.map(|(holder, ms)| Ok(LockRecord::new(key, holder, from_millis(ms)?)))
            .transpose()
    }

    async fn purge_stale(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<usize, StoreError> {
        let cutoff = stale_cutoff(now, stale_after);
        self.db
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM locks WHERE acquired_at <= ?1",
                    params![cutoff],
                )?)
            })
            .await
    }
}
