//! Data models for Flock

mod conflict;
mod queue_item;
mod stats;

pub use conflict::{Conflict, ConflictStrategy, Resolution};
pub use queue_item::{EntityTarget, ItemStatus, MutationKind, Payload, QueueItem, QueueItemId};
pub use stats::SyncStats;
