//! Conflict repository implementation

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{Conflict, QueueItemId, Resolution};

const CONFLICT_COLUMNS: &str = "id, queue_item_id, kind, client_payload, server_payload, \
                                divergent_field, detected_at, resolved, resolution";

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Persist a detected conflict, returning it with its assigned row id
    fn insert(&self, conflict: &Conflict) -> Result<Conflict>;

    /// Get a conflict by row id
    fn get(&self, id: i64) -> Result<Option<Conflict>>;

    /// List unresolved conflicts, oldest first
    fn list_unresolved(&self) -> Result<Vec<Conflict>>;

    /// Number of unresolved conflicts
    fn count_unresolved(&self) -> Result<usize>;

    /// Record the applied resolution; the row is kept as history
    fn mark_resolved(&self, id: i64, resolution: Resolution) -> Result<()>;

    /// Drop unresolved conflicts referencing a queue item
    fn remove_unresolved_for(&self, queue_item_id: &QueueItemId) -> Result<()>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a conflict from a database row
    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
        let queue_item_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let client_payload: String = row.get(3)?;
        let server_payload: String = row.get(4)?;
        let resolution: Option<String> = row.get(8)?;

        Ok(Conflict {
            id: row.get(0)?,
            queue_item_id: queue_item_id.parse().map_err(|e| invalid_column(1, e))?,
            kind: kind.parse().map_err(|e| invalid_column(2, e))?,
            client_payload: serde_json::from_str(&client_payload)
                .map_err(|e| invalid_column(3, e))?,
            server_payload: serde_json::from_str(&server_payload)
                .map_err(|e| invalid_column(4, e))?,
            divergent_field: row.get(5)?,
            detected_at: row.get(6)?,
            resolved: row.get::<_, i32>(7)? != 0,
            resolution: resolution
                .map(|value| value.parse().map_err(|e| invalid_column(8, e)))
                .transpose()?,
        })
    }
}

fn invalid_column(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn insert(&self, conflict: &Conflict) -> Result<Conflict> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (queue_item_id, kind, client_payload, server_payload,
                                         divergent_field, detected_at, resolved, resolution)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.queue_item_id.as_str(),
                conflict.kind.as_str(),
                serde_json::to_string(&conflict.client_payload)?,
                serde_json::to_string(&conflict.server_payload)?,
                conflict.divergent_field,
                conflict.detected_at,
                i32::from(conflict.resolved),
                conflict.resolution.map(Resolution::as_str),
            ],
        )?;

        let mut persisted = conflict.clone();
        persisted.id = self.conn.last_insert_rowid();
        Ok(persisted)
    }

    fn get(&self, id: i64) -> Result<Option<Conflict>> {
        let result = self.conn.query_row(
            &format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?"),
            params![id],
            Self::parse_conflict,
        );

        match result {
            Ok(conflict) => Ok(Some(conflict)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_unresolved(&self) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE resolved = 0
             ORDER BY detected_at ASC, id ASC"
        ))?;

        let conflicts = stmt
            .query_map([], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn count_unresolved(&self) -> Result<usize> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    fn mark_resolved(&self, id: i64, resolution: Resolution) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET resolved = 1, resolution = ? WHERE id = ?",
            params![resolution.as_str(), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("conflict {id}")));
        }

        Ok(())
    }

    fn remove_unresolved_for(&self, queue_item_id: &QueueItemId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_conflicts WHERE queue_item_id = ? AND resolved = 0",
            params![queue_item_id.as_str()],
        )?;
        Ok(())
    }
}
