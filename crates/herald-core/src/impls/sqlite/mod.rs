//! SQLite implementations of the store and scheduler ports.
//!
//! Every store shares one [`SqliteDatabase`]: a `tokio_rusqlite` connection
//! whose dedicated thread runs all statements in FIFO order. Closures passed
//! to [`SqliteDatabase::call`] must only run SQL and row mapping.
//!
//! Timestamps are stored as UTC milliseconds so range predicates and
//! `ORDER BY` stay index-friendly.

mod lock;
mod migrations;
mod outbox;
mod retry;
mod scheduler;

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use tracing::info;

use crate::domain::StoreError;

pub use lock::SqliteLockStore;
pub use migrations::CURRENT_VERSION;
pub use outbox::SqliteOutboxStore;
pub use retry::SqliteRetryStore;
pub use scheduler::SqliteTaskScheduler;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => e.into(),
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Backend("connection closed".to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// Shared handle to the pipeline database.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Opens (or creates) the database file, enables WAL and runs migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }

        info!(path = %path.display(), "opening pipeline database");
        let conn = Connection::open(path).await.map_err(from_tokio_rusqlite)?;
        let db = Self { conn };
        db.configure(true).await?;
        Ok(db)
    }

    /// Private in-memory database, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(from_tokio_rusqlite)?;
        let db = Self { conn };
        db.configure(false).await?;
        Ok(db)
    }

    async fn configure(&self, wal: bool) -> Result<(), StoreError> {
        self.call(move |conn| {
            if wal {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    ",
                )?;
            }
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
            migrations::run_migrations(conn)
        })
        .await
    }

    /// Runs `f` on the database thread.
    pub async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(from_tokio_rusqlite)?
    }

    pub fn outbox(&self) -> SqliteOutboxStore {
        SqliteOutboxStore::new(self.clone())
    }

    pub fn retries(&self) -> SqliteRetryStore {
        SqliteRetryStore::new(self.clone())
    }

    pub fn locks(&self) -> SqliteLockStore {
        SqliteLockStore::new(self.clone())
    }

    pub fn scheduler(&self) -> SqliteTaskScheduler {
        SqliteTaskScheduler::new(self.clone())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

fn parse_column<T>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("bad {column} value {raw:?}: {e}")))
}
