//! Pass status reporting for the UI.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Overall sync engine status surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Nothing to report
    #[default]
    Idle,
    /// A pass is replaying items
    Syncing,
    /// The last pass replayed at least one item
    Success,
    /// The last pass failed every item it touched
    Error,
    /// The last pass parked at least one conflict
    Conflict,
}

impl SyncStatus {
    /// Stable string tag for logs and display
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display windows before transient statuses revert to idle
const SUCCESS_DISPLAY: Duration = Duration::from_secs(3);
const ERROR_DISPLAY: Duration = Duration::from_secs(5);

/// Tracks the current pass status and progress percentage.
///
/// Success and error are display states: they revert to idle after a
/// short window unless a newer pass has replaced them. Conflict sticks
/// until the next pass.
#[derive(Debug, Default)]
pub struct StatusReporter {
    status: Mutex<SyncStatus>,
    progress: AtomicU8,
    epoch: AtomicU64,
}

impl StatusReporter {
    /// Create an idle reporter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Progress through the current pass, 0-100
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_pass(&self) {
        self.set(SyncStatus::Syncing);
        self.progress.store(0, Ordering::Relaxed);
    }

    pub(crate) fn set_progress(&self, done: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            u8::try_from(done * 100 / total).unwrap_or(100)
        };
        self.progress.store(percent, Ordering::Relaxed);
    }

    /// Record the end-of-pass status; transient statuses revert to idle
    /// after their display window unless something newer replaced them.
    /// Must be called from within a Tokio runtime.
    pub(crate) fn finish_pass(self: Arc<Self>, status: SyncStatus) {
        let epoch = self.set(status);

        let revert_after = match status {
            SyncStatus::Success => Some(SUCCESS_DISPLAY),
            SyncStatus::Error => Some(ERROR_DISPLAY),
            _ => None,
        };
        if let Some(delay) = revert_after {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                self.revert_if_current(epoch);
            });
        }
    }

    fn set(&self, status: SyncStatus) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
        epoch
    }

    fn revert_if_current(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            *self.status.lock().unwrap_or_else(PoisonError::into_inner) = SyncStatus::Idle;
        }
    }
}
