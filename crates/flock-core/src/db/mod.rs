//! Database layer for Flock

mod connection;
mod conflict_repository;
mod migrations;
mod queue_repository;
mod settings_repository;
mod stats_repository;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use queue_repository::{QueueCounts, QueueRepository, SqliteQueueRepository};
pub use settings_repository::{SettingsRepository, SqliteSettingsRepository};
pub use stats_repository::{SqliteStatsRepository, StatsRepository};
