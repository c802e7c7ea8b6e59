//! Service host discovery.
//!
//! [`EndpointCache`] holds resolved host groups per `(bucket, accessKey)`
//! and persists them to disk. [`Queryer`] resolves hosts for one account
//! through the cache, querying the directory service on a miss and
//! refreshing expired entries in the background.

pub mod cache;
pub mod queryer;

pub use cache::{CacheEntry, EndpointCache, cache_key, default_cache_dir};
pub use queryer::Queryer;

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory returned no hosts")]
    EmptyResponse,

    #[error("no directory hosts configured")]
    NoDirectoryHosts,
}
