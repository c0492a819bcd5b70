//! Offline mutation queue and synchronization engine.
//!
//! Mutations recorded while disconnected are persisted by the queue
//! repositories and replayed by [`SyncService`] once connectivity
//! returns. Failed replays back off exponentially behind a single
//! coalesced retry timer; divergent server records are resolved by the
//! configured conflict strategy or parked for a human decision.

mod backoff;
mod connectivity;
mod conflict;
mod engine;
mod scheduler;
mod status;

pub use backoff::BackoffPolicy;
pub use connectivity::{ConnectivityMonitor, Transition};
pub use engine::{PassSummary, SyncConfig, SyncService};
pub use status::SyncStatus;
