//! Queue repository implementation

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{ItemStatus, MutationKind, Payload, QueueItem, QueueItemId};

/// Columns read back for a full queue item row
const ITEM_COLUMNS: &str = "id, kind, payload, enqueued_at, status, retry_count, \
                            last_attempt_at, next_retry_at, last_error, server_version_seen";

/// Per-status tallies shown in the queue badge row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Items waiting for the next pass
    pub pending: usize,
    /// Items whose last replay failed
    pub failed: usize,
    /// Items parked on an unresolved conflict
    pub conflict: usize,
}

/// Trait for queue storage operations
pub trait QueueRepository {
    /// Persist a new pending mutation and return it; safe to call offline
    fn enqueue(
        &self,
        kind: MutationKind,
        payload: Payload,
        server_version_seen: Option<String>,
    ) -> Result<QueueItem>;

    /// Get an item by ID
    fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// List all items in enqueue order
    fn list(&self) -> Result<Vec<QueueItem>>;

    /// List items with the given status, in enqueue order
    fn list_by_status(&self, status: ItemStatus) -> Result<Vec<QueueItem>>;

    /// Items replayable at `now`: pending, or failed below the retry cap
    /// with an elapsed (or unset) backoff window; enqueue order
    fn eligible(&self, now: i64, max_retries: u32) -> Result<Vec<QueueItem>>;

    /// Replace an item's full row
    fn update(&self, item: &QueueItem) -> Result<()>;

    /// Delete an item and any unresolved conflicts referencing it.
    /// Deleting a missing item is a no-op.
    fn remove(&self, id: &QueueItemId) -> Result<()>;

    /// Delete every item and all recorded conflicts
    fn clear(&self) -> Result<()>;

    /// Delete failed items only
    fn clear_failed(&self) -> Result<()>;

    /// Per-status tallies
    fn counts(&self) -> Result<QueueCounts>;

    /// Earliest `next_retry_at` among failed items below the retry cap
    fn earliest_retry_at(&self, max_retries: u32) -> Result<Option<i64>>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a queue item from a database row
    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let status: String = row.get(4)?;

        Ok(QueueItem {
            id: id.parse().map_err(|e| invalid_column(0, e))?,
            kind: kind.parse().map_err(|e| invalid_column(1, e))?,
            payload: serde_json::from_str(&payload).map_err(|e| invalid_column(2, e))?,
            enqueued_at: row.get(3)?,
            status: status.parse().map_err(|e| invalid_column(4, e))?,
            retry_count: row.get(5)?,
            last_attempt_at: row.get(6)?,
            next_retry_at: row.get(7)?,
            last_error: row.get(8)?,
            server_version_seen: row.get(9)?,
        })
    }
}

fn invalid_column(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn enqueue(
        &self,
        kind: MutationKind,
        payload: Payload,
        server_version_seen: Option<String>,
    ) -> Result<QueueItem> {
        let item = QueueItem::new(kind, payload, server_version_seen);

        self.conn.execute(
            "INSERT INTO sync_queue (id, kind, payload, enqueued_at, status, retry_count,
                                     last_attempt_at, next_retry_at, last_error, server_version_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.as_str(),
                item.kind.as_str(),
                serde_json::to_string(&item.payload)?,
                item.enqueued_at,
                item.status.as_str(),
                item.retry_count,
                item.last_attempt_at,
                item.next_retry_at,
                item.last_error,
                item.server_version_seen,
            ],
        )?;

        Ok(item)
    }

    fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        let result = self.conn.query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?"),
            params![id.as_str()],
            Self::parse_item,
        );

        match result {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM sync_queue ORDER BY enqueued_at ASC, id ASC"
        ))?;

        let items = stmt
            .query_map([], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn list_by_status(&self, status: ItemStatus) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM sync_queue WHERE status = ?
             ORDER BY enqueued_at ASC, id ASC"
        ))?;

        let items = stmt
            .query_map(params![status.as_str()], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn eligible(&self, now: i64, max_retries: u32) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM sync_queue
             WHERE status = 'pending'
                OR (status = 'failed' AND retry_count < ?1
                    AND (next_retry_at IS NULL OR next_retry_at <= ?2))
             ORDER BY enqueued_at ASC, id ASC"
        ))?;

        let items = stmt
            .query_map(params![max_retries, now], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn update(&self, item: &QueueItem) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_queue
             SET kind = ?, payload = ?, status = ?, retry_count = ?,
                 last_attempt_at = ?, next_retry_at = ?, last_error = ?, server_version_seen = ?
             WHERE id = ?",
            params![
                item.kind.as_str(),
                serde_json::to_string(&item.payload)?,
                item.status.as_str(),
                item.retry_count,
                item.last_attempt_at,
                item.next_retry_at,
                item.last_error,
                item.server_version_seen,
                item.id.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(item.id.to_string()));
        }

        Ok(())
    }

    fn remove(&self, id: &QueueItemId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_conflicts WHERE queue_item_id = ? AND resolved = 0",
            params![id.as_str()],
        )?;
        self.conn.execute(
            "DELETE FROM sync_queue WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM sync_queue", [])?;
        self.conn.execute("DELETE FROM sync_conflicts", [])?;
        Ok(())
    }

    fn clear_failed(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE status = 'failed'", [])?;
        Ok(())
    }

    fn counts(&self) -> Result<QueueCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" | "syncing" => counts.pending += count,
                "failed" => counts.failed = count,
                "conflict" => counts.conflict = count,
                _ => {}
            }
        }

        Ok(counts)
    }

    fn earliest_retry_at(&self, max_retries: u32) -> Result<Option<i64>> {
        let earliest: Option<i64> = self.conn.query_row(
            "SELECT MIN(next_retry_at) FROM sync_queue
             WHERE status = 'failed' AND retry_count < ? AND next_retry_at IS NOT NULL",
            params![max_retries],
            |row| row.get(0),
        )?;

        Ok(earliest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConflictRepository, Database, SqliteConflictRepository};
    use crate::models::Conflict;
    use crate::util::unix_timestamp_ms;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn crisis_payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("member_id".to_string(), "m-001".into());
        payload.insert("urgency".to_string(), "high".into());
        payload
    }

    #[test]
    fn test_enqueue_and_get() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let item = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), Some("v1".to_string()))
            .unwrap();
        assert_eq!(item.status, ItemStatus::Pending);

        let fetched = repo.get(&item.id).unwrap().unwrap();
        assert_eq!(fetched, item);
        assert_eq!(fetched.payload["urgency"], "high");
        assert_eq!(fetched.server_version_seen.as_deref(), Some("v1"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        assert!(repo.get(&QueueItemId::new()).unwrap().is_none());
    }

    #[test]
    fn test_list_preserves_enqueue_order() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = repo
            .enqueue(MutationKind::PastoralAction, crisis_payload(), None)
            .unwrap();
        let second = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        let third = repo
            .enqueue(MutationKind::PastoralAction, crisis_payload(), None)
            .unwrap();

        let listed: Vec<QueueItemId> = repo.list().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(listed, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn test_update_replaces_full_row() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut item = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        item.status = ItemStatus::Failed;
        item.retry_count = 4;
        item.last_attempt_at = Some(123);
        item.next_retry_at = Some(456);
        item.last_error = Some("connection reset".to_string());
        repo.update(&item).unwrap();

        let fetched = repo.get(&item.id).unwrap().unwrap();
        assert_eq!(fetched, item);
    }

    #[test]
    fn test_update_missing_item_errors() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let item = QueueItem::new(MutationKind::CrisisReport, crisis_payload(), None);
        assert!(matches!(repo.update(&item), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_remove_also_drops_unresolved_conflicts() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let conflicts = SqliteConflictRepository::new(db.connection());

        let item = repo
            .enqueue(MutationKind::PastoralAction, crisis_payload(), Some("v1".to_string()))
            .unwrap();
        conflicts
            .insert(&Conflict::new(&item, Payload::new(), "updated_at"))
            .unwrap();
        assert_eq!(conflicts.count_unresolved().unwrap(), 1);

        repo.remove(&item.id).unwrap();

        assert!(repo.get(&item.id).unwrap().is_none());
        assert_eq!(conflicts.count_unresolved().unwrap(), 0);
    }

    #[test]
    fn test_eligible_selection() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let now = unix_timestamp_ms();

        let pending = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();

        let mut waiting = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        waiting.status = ItemStatus::Failed;
        waiting.retry_count = 2;
        waiting.next_retry_at = Some(now + 60_000);
        repo.update(&waiting).unwrap();

        let mut elapsed = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        elapsed.status = ItemStatus::Failed;
        elapsed.retry_count = 2;
        elapsed.next_retry_at = Some(now - 1_000);
        repo.update(&elapsed).unwrap();

        let mut exhausted = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        exhausted.status = ItemStatus::Failed;
        exhausted.retry_count = 10;
        repo.update(&exhausted).unwrap();

        let mut parked = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        parked.status = ItemStatus::Conflict;
        repo.update(&parked).unwrap();

        let selected: Vec<QueueItemId> = repo
            .eligible(now, 10)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(selected, vec![pending.id, elapsed.id]);
    }

    #[test]
    fn test_counts_and_clear_failed() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        repo.enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        let mut failed = repo
            .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
            .unwrap();
        failed.status = ItemStatus::Failed;
        repo.update(&failed).unwrap();

        let counts = repo.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.conflict, 0);

        repo.clear_failed().unwrap();
        let counts = repo.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn test_earliest_retry_at() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let now = unix_timestamp_ms();

        assert_eq!(repo.earliest_retry_at(10).unwrap(), None);

        for (retries, at) in [(1_u32, now + 8_000), (2, now + 2_000), (10, now + 500)] {
            let mut item = repo
                .enqueue(MutationKind::CrisisReport, crisis_payload(), None)
                .unwrap();
            item.status = ItemStatus::Failed;
            item.retry_count = retries;
            item.next_retry_at = Some(at);
            repo.update(&item).unwrap();
        }

        // The exhausted item's earlier slot does not count
        assert_eq!(repo.earliest_retry_at(10).unwrap(), Some(now + 2_000));
    }

    #[test]
    fn test_queue_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("flock.db");

        let id = {
            let db = Database::open(&db_path).unwrap();
            let repo = SqliteQueueRepository::new(db.connection());
            repo.enqueue(MutationKind::CrisisReport, crisis_payload(), None)
                .unwrap()
                .id
        };

        let db = Database::open(&db_path).unwrap();
        let repo = SqliteQueueRepository::new(db.connection());
        let item = repo.get(&id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.payload["member_id"], "m-001");
    }
}
