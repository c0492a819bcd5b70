//! Coalesced retry timer.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-slot timer driving automatic retries.
///
/// Re-arming replaces the previously armed timer, so at most one wakeup
/// is ever outstanding no matter how many items are waiting on backoff.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl RetryScheduler {
    /// Create a disarmed scheduler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to run `wake` after `delay`, replacing any armed
    /// timer. Must be called from within a Tokio runtime.
    pub fn rearm<F>(&self, delay: Duration, wake: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            wake.await;
        });

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the armed timer, if any
    pub fn disarm(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rearm_replaces_previous_timer() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            scheduler.rearm(Duration::from_millis(30), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disarm_cancels_timer() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        {
            let fired = Arc::clone(&fired);
            scheduler.rearm(Duration::from_millis(30), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.disarm();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
