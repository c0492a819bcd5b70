//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: mutation queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS sync_queue (
             id TEXT PRIMARY KEY,
             kind TEXT NOT NULL,
             payload TEXT NOT NULL,
             enqueued_at INTEGER NOT NULL,
             status TEXT NOT NULL DEFAULT 'pending',
             retry_count INTEGER NOT NULL DEFAULT 0,
             last_attempt_at INTEGER,
             next_retry_at INTEGER,
             last_error TEXT,
             server_version_seen TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_sync_queue_enqueued ON sync_queue(enqueued_at ASC);
         CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: conflict log, stats, local settings
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS sync_conflicts (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             queue_item_id TEXT NOT NULL,
             kind TEXT NOT NULL,
             client_payload TEXT NOT NULL,
             server_payload TEXT NOT NULL,
             divergent_field TEXT NOT NULL,
             detected_at INTEGER NOT NULL,
             resolved INTEGER NOT NULL DEFAULT 0,
             resolution TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_sync_conflicts_item ON sync_conflicts(queue_item_id);
         CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved ON sync_conflicts(resolved);
         CREATE TABLE IF NOT EXISTS sync_stats (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             total_synced INTEGER NOT NULL DEFAULT 0,
             total_failed INTEGER NOT NULL DEFAULT 0,
             last_sync_at INTEGER,
             last_success_at INTEGER,
             average_pass_duration_ms INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS settings (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         INSERT INTO schema_version (version) VALUES (2);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migration_v2_creates_conflict_and_stats_tables() {
        let conn = setup();
        run(&conn).unwrap();

        for table in ["sync_conflicts", "sync_stats", "settings"] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM sqlite_master
                        WHERE type = 'table' AND name = ?
                    )",
                    [table],
                    |row| row.get::<_, i32>(0).map(|value| value != 0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }
}
