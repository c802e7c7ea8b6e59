use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use tracing::warn;

use crate::tracker::HostHealthTracker;

/// Round-robin host picker that skips hosts the tracker marks invalid.
///
/// The cursor is shared by every caller of the same selector, so
/// concurrent sessions spread across the pool.
#[derive(Debug)]
pub struct HostSelector {
    tracker: Arc<HostHealthTracker>,
    cursor: AtomicUsize,
}

impl HostSelector {
    pub fn new(tracker: Arc<HostHealthTracker>) -> Self {
        Self {
            tracker,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn tracker(&self) -> &Arc<HostHealthTracker> {
        &self.tracker
    }

    /// Picks the next host from `hosts`.
    ///
    /// Inspects at most `max(1, ceil(len * explore_fraction))` candidates.
    /// If none of them is valid the last one inspected is returned anyway.
    /// Returns `None` only for an empty list.
    pub fn select<'a>(&self, hosts: &'a [String]) -> Option<&'a str> {
        let n = hosts.len();
        if n == 0 {
            return None;
        }
        let fraction = self.tracker.config().explore_fraction;
        let limit = ((n as f64 * fraction).ceil() as usize).clamp(1, n);

        let mut last = None;
        for _ in 0..limit {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            let host = hosts[idx].as_str();
            if self.tracker.is_valid(host) {
                return Some(host);
            }
            last = Some(host);
        }
        if let Some(host) = last {
            warn!(host, inspected = limit, "no healthy host found, using last candidate");
        }
        last
    }
}

/// Returns `hosts` in random order.
pub fn shuffle_hosts(mut hosts: Vec<String>) -> Vec<String> {
    hosts.shuffle(&mut rand::thread_rng());
    hosts
}
