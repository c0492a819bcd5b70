//! flock-core - Core library for Flock
//!
//! This crate contains the offline mutation queue and synchronization
//! engine shared by all Flock interfaces (desktop, mobile), together with
//! the models and database layer behind them. Field workers record
//! pastoral actions and crisis reports while disconnected; the queue
//! persists them locally and the sync engine replays them to the remote
//! store once connectivity returns.

pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use db::QueueCounts;
pub use error::{Error, Result};
pub use models::{
    Conflict, ConflictStrategy, EntityTarget, ItemStatus, MutationKind, Payload, QueueItem,
    QueueItemId, Resolution, SyncStats,
};
pub use remote::{HttpRemoteStore, RemoteConfig, RemoteStore};
pub use sync::{BackoffPolicy, PassSummary, SyncConfig, SyncService, SyncStatus};
