//! Stats repository implementation

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores 64-bit signed integers

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::SyncStats;

/// Trait for aggregate statistics storage
pub trait StatsRepository {
    /// Load stats; defaults when no pass has ever run
    fn load(&self) -> Result<SyncStats>;

    /// Persist the full stats row
    fn save(&self, stats: &SyncStats) -> Result<()>;

    /// Explicitly reset all counters
    fn reset(&self) -> Result<()>;
}

/// `SQLite` implementation of `StatsRepository`
pub struct SqliteStatsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStatsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl StatsRepository for SqliteStatsRepository<'_> {
    fn load(&self) -> Result<SyncStats> {
        let result = self.conn.query_row(
            "SELECT total_synced, total_failed, last_sync_at, last_success_at,
                    average_pass_duration_ms
             FROM sync_stats WHERE id = 1",
            [],
            |row| {
                Ok(SyncStats {
                    total_synced: row.get::<_, i64>(0)? as u64,
                    total_failed: row.get::<_, i64>(1)? as u64,
                    last_sync_at: row.get(2)?,
                    last_success_at: row.get(3)?,
                    average_pass_duration_ms: row.get(4)?,
                })
            },
        );

        match result {
            Ok(stats) => Ok(stats),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SyncStats::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, stats: &SyncStats) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_stats
                 (id, total_synced, total_failed, last_sync_at, last_success_at,
                  average_pass_duration_ms)
             VALUES (1, ?, ?, ?, ?, ?)",
            params![
                stats.total_synced as i64,
                stats.total_failed as i64,
                stats.last_sync_at,
                stats.last_success_at,
                stats.average_pass_duration_ms,
            ],
        )?;
        Ok(())
    }

    fn reset(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_stats", [])?;
        Ok(())
    }
}
