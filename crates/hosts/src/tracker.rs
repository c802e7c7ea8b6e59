use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::ring::FailureRing;

/// Tuning for [`HostHealthTracker`] and host selection.
#[derive(Debug, Clone)]
pub struct HostHealthConfig {
    /// Failures within `failure_window` needed to mark a host invalid.
    pub max_failures: usize,
    /// How long a recorded failure counts against a host.
    pub failure_window: Duration,
    /// Fraction of the host list a selection inspects before giving up.
    pub explore_fraction: f64,
}

impl Default for HostHealthConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            failure_window: Duration::from_secs(60),
            explore_fraction: 0.5,
        }
    }
}

/// Rolling per-host failure history.
///
/// Records are created on the first failure and dropped on the next
/// success. Each record has its own lock so hosts never contend with
/// one another; the outer map lock is only held to find or insert a record.
pub struct HostHealthTracker {
    config: HostHealthConfig,
    clock: Arc<dyn Clock>,
    records: RwLock<HashMap<String, Arc<Mutex<FailureRing>>>>,
}

impl HostHealthTracker {
    pub fn new(config: HostHealthConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HostHealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HostHealthConfig {
        &self.config
    }

    /// Whether `host` may be selected.
    ///
    /// False only when the last `max_failures` failures all fell inside the
    /// failure window with no success in between.
    pub fn is_valid(&self, host: &str) -> bool {
        let Some(record) = self.record(host) else {
            return true;
        };
        let ring = record.lock().unwrap_or_else(PoisonError::into_inner);
        ring.has_slack(self.clock.now(), self.config.failure_window)
    }

    /// Records a failure for `host` at the current time.
    ///
    /// The push happens under the map lock, so a concurrent
    /// [`succeed`](Self::succeed) either runs first or clears this failure
    /// too; it never strands it in a removed record.
    pub fn fail(&self, host: &str) {
        let now = self.clock.now();
        {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = records.get(host) {
                record.lock().unwrap_or_else(PoisonError::into_inner).push(now);
                debug!(host, "host failure recorded");
                return;
            }
        }
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(FailureRing::new(self.config.max_failures))))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(now);
        debug!(host, "host failure recorded");
    }

    /// Forgets all recorded failures for `host`.
    pub fn succeed(&self, host: &str) {
        // Skip the write lock in the common case of a healthy host.
        if self.record(host).is_none() {
            return;
        }
        let removed = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(host);
        if removed.is_some() {
            debug!(host, "host recovered");
        }
    }

    fn record(&self, host: &str) -> Option<Arc<Mutex<FailureRing>>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }
}

impl Default for HostHealthTracker {
    fn default() -> Self {
        Self::new(HostHealthConfig::default())
    }
}

impl std::fmt::Debug for HostHealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracked = self
            .records
            .read()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("HostHealthTracker")
            .field("config", &self.config)
            .field("tracked_hosts", &tracked)
            .finish()
    }
}
