//! Schema migrations, tracked in the `migrations` table.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::domain::StoreError;

pub const CURRENT_VERSION: i32 = 3;

pub(super) fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "schema up to date");
        return Ok(());
    }

    info!(
        current_version,
        target_version = CURRENT_VERSION,
        "running migrations"
    );

    if current_version < 1 {
        migrate_v1_outbox_and_retries(conn)?;
    }
    if current_version < 2 {
        migrate_v2_locks_and_tasks(conn)?;
    }
    if current_version < 3 {
        migrate_v3_lock_holders(conn)?;
    }
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "migration applied");
    Ok(())
}

fn migrate_v1_outbox_and_retries(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_items (
            id TEXT PRIMARY KEY,
            activity_type TEXT NOT NULL,
            object_reference TEXT NOT NULL,
            actor TEXT NOT NULL,
            visibility TEXT NOT NULL,
            status TEXT NOT NULL,
            follower_offset INTEGER,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            invalidated_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_items_supersede
            ON outbox_items(status, object_reference, activity_type);
        CREATE INDEX IF NOT EXISTS idx_outbox_items_status_updated
            ON outbox_items(status, updated_at);

        CREATE TABLE IF NOT EXISTS retry_batches (
            key TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            endpoints TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_retry_batches_item ON retry_batches(item_id);
        CREATE INDEX IF NOT EXISTS idx_retry_batches_expires ON retry_batches(expires_at);
        ",
    )?;
    record_migration(&tx, 1, "outbox_and_retries")?;
    tx.commit()?;
    Ok(())
}

fn migrate_v2_locks_and_tasks(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS locks (
            key TEXT PRIMARY KEY,
            acquired_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id TEXT PRIMARY KEY,
            trigger_name TEXT NOT NULL,
            args TEXT NOT NULL,
            item_id TEXT,
            run_at INTEGER NOT NULL,
            leased_until INTEGER,
            due_at INTEGER NOT NULL,
            deliveries INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(due_at, id);
        CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_item ON scheduled_tasks(item_id);
        ",
    )?;
    record_migration(&tx, 2, "locks_and_tasks")?;
    tx.commit()?;
    Ok(())
}

fn migrate_v3_lock_holders(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch("ALTER TABLE locks ADD COLUMN holder TEXT NOT NULL DEFAULT '';")?;
    record_migration(&tx, 3, "lock_holders")?;
    tx.commit()?;
    Ok(())
}
