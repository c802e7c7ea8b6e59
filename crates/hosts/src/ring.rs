use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Fixed-capacity ring of failure timestamps for one host.
///
/// When full, each push evicts the oldest timestamp.
#[derive(Debug, Clone)]
pub(crate) struct FailureRing {
    buf: VecDeque<Instant>,
    capacity: usize,
}

impl FailureRing {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, at: Instant) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(at);
    }

    /// True if some slot is still empty or holds a failure older than `window`.
    pub(crate) fn has_slack(&self, now: Instant, window: Duration) -> bool {
        if self.buf.len() < self.capacity {
            return true;
        }
        self.buf
            .iter()
            .any(|&t| now.saturating_duration_since(t) > window)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }
}
