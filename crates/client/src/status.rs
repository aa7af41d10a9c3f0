//! Global loading indicator and network-error flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Request activity of one tab.
///
/// The loading indicator is a counter of outstanding non-silent requests, so
/// overlapping requests keep it on until the last one settles.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    in_flight: AtomicUsize,
    network_error: AtomicBool,
}

impl ActivityMonitor {
    /// Mark one request as outstanding until the returned guard is dropped.
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> LoadingGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            monitor: Arc::clone(self),
        }
    }

    /// True while any non-silent request is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// True after a request got no response, until a later one succeeds.
    #[must_use]
    pub fn has_network_error(&self) -> bool {
        self.network_error.load(Ordering::SeqCst)
    }

    pub(crate) fn set_network_error(&self, value: bool) {
        self.network_error.store(value, Ordering::SeqCst);
    }
}

/// Releases the loading indicator when dropped.
#[derive(Debug)]
pub struct LoadingGuard {
    monitor: Arc<ActivityMonitor>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.monitor.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
