use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use partsync_hosts::HostHealthTracker;
use partsync_protocol::QueryResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::DiscoveryError;

/// File name of the persisted cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "query-cache.json";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// One resolved directory answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hosts: QueryResponse,
    pub expired_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds an entry expiring after the smallest TTL in `hosts`.
    pub fn new(hosts: QueryResponse, now: DateTime<Utc>) -> Self {
        let ttl = hosts.min_ttl().unwrap_or(0).min(MAX_TTL_SECS);
        Self {
            hosts,
            expired_at: now + chrono::Duration::seconds(ttl as i64),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expired_at
    }
}

type EntryMap = HashMap<String, Arc<CacheEntry>>;

/// Shared cache of directory answers.
///
/// The map is copy-on-write: every update builds a new map and swaps it
/// in, so a reader holding a snapshot never sees a half-written entry.
/// One `EndpointCache` is normally shared by every [`Queryer`](crate::Queryer)
/// in the process.
pub struct EndpointCache {
    entries: RwLock<Arc<EntryMap>>,
    pub(crate) update_lock: tokio::sync::Mutex<()>,
    write_lock: tokio::sync::Mutex<()>,
    persisting: AtomicBool,
    cache_file: Option<PathBuf>,
    pub(crate) http: reqwest::Client,
    tracker: Arc<HostHealthTracker>,
}

impl EndpointCache {
    /// Creates an in-memory cache. Nothing is persisted until a cache
    /// directory is set.
    pub fn new(tracker: Arc<HostHealthTracker>) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(tracker, http))
    }

    pub fn with_http_client(tracker: Arc<HostHealthTracker>, http: reqwest::Client) -> Self {
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            update_lock: tokio::sync::Mutex::new(()),
            write_lock: tokio::sync::Mutex::new(()),
            persisting: AtomicBool::new(false),
            cache_file: None,
            http,
            tracker,
        }
    }

    /// Persists to `dir/query-cache.json`, loading whatever is already there.
    ///
    /// A missing or unreadable file leaves the cache empty.
    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(CACHE_FILE_NAME);
        match load_entries(&path) {
            Ok(loaded) => {
                debug!("loaded {} cache entries from {:?}", loaded.len(), path);
                self.swap(Arc::new(loaded));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable host cache"),
        }
        self.cache_file = Some(path);
        self
    }

    /// Same as [`with_cache_dir`](Self::with_cache_dir) using [`default_cache_dir`].
    pub fn with_default_cache_dir(self) -> Self {
        match default_cache_dir() {
            Some(dir) => self.with_cache_dir(dir),
            None => self,
        }
    }

    pub fn tracker(&self) -> &Arc<HostHealthTracker> {
        &self.tracker
    }

    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.snapshot().get(key).cloned()
    }

    /// Replaces the entry for `key`.
    pub fn insert(&self, key: &str, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = EntryMap::clone(&guard);
        next.insert(key.to_string(), entry.clone());
        *guard = Arc::new(next);
        entry
    }

    /// Writes the whole cache to the cache file, if one is set.
    pub async fn persist(&self) -> Result<(), DiscoveryError> {
        let Some(path) = self.cache_file.as_ref() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let snapshot = self.snapshot();
        let view: HashMap<&str, &CacheEntry> = snapshot
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_ref()))
            .collect();
        let json = serde_json::to_vec_pretty(&view)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("persisted {} cache entries to {:?}", snapshot.len(), path);
        Ok(())
    }

    /// Starts a background persist unless one is already running.
    pub(crate) fn persist_in_background(self: &Arc<Self>) {
        if self.cache_file.is_none() || self.persisting.swap(true, Ordering::AcqRel) {
            return;
        }
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = cache.persist().await {
                warn!(error = %e, "failed to persist host cache");
            }
            cache.persisting.store(false, Ordering::Release);
        });
    }

    fn snapshot(&self) -> Arc<EntryMap> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, next: Arc<EntryMap>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

impl std::fmt::Debug for EndpointCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCache")
            .field("entries", &self.snapshot().len())
            .field("cache_file", &self.cache_file)
            .finish()
    }
}

/// Cache key for one account and bucket.
pub fn cache_key(bucket: &str, access_key: &str) -> String {
    format!("{bucket}:{access_key}")
}

fn load_entries(path: &Path) -> Result<EntryMap, DiscoveryError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read(path)?;
    let entries: HashMap<String, CacheEntry> = serde_json::from_slice(&data)?;
    Ok(entries
        .into_iter()
        .map(|(k, v)| (k, Arc::new(v)))
        .collect())
}

/// Default directory for the persisted cache: `<platform cache dir>/partsync`.
pub fn default_cache_dir() -> Option<PathBuf> {
    platform_cache_dir().map(|d| d.join("partsync"))
}

fn platform_cache_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CACHE_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".cache"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".cache"))
    }
}
