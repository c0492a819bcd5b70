//! Settings repository implementation

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::ConflictStrategy;

/// Trait for local settings storage
pub trait SettingsRepository {
    /// Load the configured conflict strategy (default when unset)
    fn conflict_strategy(&self) -> Result<ConflictStrategy>;

    /// Persist the configured conflict strategy
    fn set_conflict_strategy(&self, strategy: ConflictStrategy) -> Result<()>;
}

/// `SQLite` implementation of `SettingsRepository`
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn conflict_strategy(&self) -> Result<ConflictStrategy> {
        Ok(self
            .get_setting("conflict_strategy")?
            .and_then(|value| value.parse().ok())
            .unwrap_or_default())
    }

    fn set_conflict_strategy(&self, strategy: ConflictStrategy) -> Result<()> {
        self.set_setting("conflict_strategy", strategy.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_default_strategy_when_unset() {
        let db = setup();
        let repo = SqliteSettingsRepository::new(db.connection());

        assert_eq!(
            repo.conflict_strategy().unwrap(),
            ConflictStrategy::ClientWins
        );
    }

    #[test]
    fn test_set_and_load_strategy() {
        let db = setup();
        let repo = SqliteSettingsRepository::new(db.connection());

        repo.set_conflict_strategy(ConflictStrategy::Manual).unwrap();
        assert_eq!(repo.conflict_strategy().unwrap(), ConflictStrategy::Manual);

        repo.set_conflict_strategy(ConflictStrategy::Merge).unwrap();
        assert_eq!(repo.conflict_strategy().unwrap(), ConflictStrategy::Merge);
    }

    #[test]
    fn test_unknown_stored_value_falls_back_to_default() {
        let db = setup();
        let repo = SqliteSettingsRepository::new(db.connection());

        repo.set_setting("conflict_strategy", "newest_wins").unwrap();
        assert_eq!(
            repo.conflict_strategy().unwrap(),
            ConflictStrategy::ClientWins
        );
    }
}
