//! Per-host failure tracking and host selection.
//!
//! A [`HostHealthTracker`] is shared (behind an `Arc`) by every component
//! that talks to service hosts. Failures are recorded in a small ring of
//! timestamps per host; a single success forgets the host's history.
//! [`HostSelector`] walks a host list round-robin and prefers hosts the
//! tracker still considers valid.

pub mod clock;
mod ring;
pub mod selector;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use selector::{HostSelector, shuffle_hosts};
pub use tracker::{HostHealthConfig, HostHealthTracker};
