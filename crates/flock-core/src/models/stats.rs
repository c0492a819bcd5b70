//! Aggregate sync statistics

use serde::{Deserialize, Serialize};

/// Counters updated by the sync engine at the end of every pass.
///
/// Never decremented except by an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncStats {
    /// Items successfully replayed, all time
    pub total_synced: u64,
    /// Failed replay attempts, all time
    pub total_failed: u64,
    /// When the last pass finished (Unix ms)
    pub last_sync_at: Option<i64>,
    /// When a pass last replayed at least one item (Unix ms)
    pub last_success_at: Option<i64>,
    /// Running average pass duration (ms)
    pub average_pass_duration_ms: i64,
}

impl SyncStats {
    /// Fold one finished pass into the running totals.
    pub fn record_pass(&mut self, synced: u64, failed: u64, duration_ms: i64, now: i64) {
        self.total_synced += synced;
        self.total_failed += failed;
        self.last_sync_at = Some(now);
        if synced > 0 {
            self.last_success_at = Some(now);
        }
        self.average_pass_duration_ms = if self.average_pass_duration_ms == 0 {
            duration_ms
        } else {
            (self.average_pass_duration_ms + duration_ms) / 2
        };
    }
}
