//! Network reachability tracking.

use std::sync::atomic::{AtomicBool, Ordering};

/// Edge emitted when reachability changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// offline -> online
    CameOnline,
    /// online -> offline
    WentOffline,
}

/// Tracks reachability as reported by the embedding shell.
///
/// Emits a transition exactly once per edge; repeated identical reports
/// are ignored. Pure observation, this component cannot fail.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial reachability
    #[must_use]
    pub const fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
        }
    }

    /// Whether the network is currently considered reachable
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record a reachability report, returning the edge if one occurred
    pub fn observe(&self, reachable: bool) -> Option<Transition> {
        let previous = self.online.swap(reachable, Ordering::SeqCst);
        match (previous, reachable) {
            (false, true) => Some(Transition::CameOnline),
            (true, false) => Some(Transition::WentOffline),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_emitted_once() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        assert_eq!(monitor.observe(true), Some(Transition::CameOnline));
        assert!(monitor.is_online());
        assert_eq!(monitor.observe(true), None);

        assert_eq!(monitor.observe(false), Some(Transition::WentOffline));
        assert_eq!(monitor.observe(false), None);
    }
}
