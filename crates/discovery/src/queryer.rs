use std::sync::Arc;

use chrono::Utc;
use partsync_hosts::{HostSelector, shuffle_hosts};
use partsync_protocol::{QueryResponse, ServiceRole};
use tracing::{debug, info, warn};

use crate::DiscoveryError;
use crate::cache::{CacheEntry, EndpointCache, cache_key};

/// Directory queries per refresh before giving up.
pub const MAX_QUERY_ATTEMPTS: usize = 10;

/// Resolves service hosts for one `(access key, bucket)` pair.
///
/// Cheap to clone; clones share the cache and the directory host cursor.
#[derive(Debug, Clone)]
pub struct Queryer {
    access_key: String,
    bucket: String,
    uc_hosts: Arc<Vec<String>>,
    selector: Arc<HostSelector>,
    cache: Arc<EndpointCache>,
}

impl Queryer {
    /// Creates a queryer. `uc_hosts` are directory base URLs; they are
    /// shuffled once so separate processes start on different hosts.
    pub fn new(
        cache: Arc<EndpointCache>,
        access_key: impl Into<String>,
        bucket: impl Into<String>,
        uc_hosts: Vec<String>,
    ) -> Self {
        let selector = HostSelector::new(cache.tracker().clone());
        Self {
            access_key: access_key.into(),
            bucket: bucket.into(),
            uc_hosts: Arc::new(shuffle_hosts(uc_hosts)),
            selector: Arc::new(selector),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<EndpointCache> {
        &self.cache
    }

    pub async fn query_up_hosts(&self, https: bool) -> Result<Vec<String>, DiscoveryError> {
        self.query_hosts(ServiceRole::Up, https).await
    }

    pub async fn query_io_hosts(&self, https: bool) -> Result<Vec<String>, DiscoveryError> {
        self.query_hosts(ServiceRole::Io, https).await
    }

    pub async fn query_rs_hosts(&self, https: bool) -> Result<Vec<String>, DiscoveryError> {
        self.query_hosts(ServiceRole::Rs, https).await
    }

    pub async fn query_rsf_hosts(&self, https: bool) -> Result<Vec<String>, DiscoveryError> {
        self.query_hosts(ServiceRole::Rsf, https).await
    }

    /// Returns the host URLs for `role`.
    ///
    /// A fresh cached entry is returned without network I/O. An expired
    /// entry is returned as-is while a background task refreshes it. Only
    /// a missing entry makes the caller wait for the directory.
    pub async fn query_hosts(
        &self,
        role: ServiceRole,
        https: bool,
    ) -> Result<Vec<String>, DiscoveryError> {
        let key = self.key();
        if let Some(entry) = self.cache.get(&key) {
            if entry.is_expired(Utc::now()) {
                self.spawn_refresh();
            }
            return Ok(entry.hosts.hosts_for(role, https));
        }

        let entry = self.refresh().await?;
        Ok(entry.hosts.hosts_for(role, https))
    }

    /// Refreshes the cached entry if it is missing or expired.
    ///
    /// Concurrent callers serialize on the cache's update lock; whoever
    /// arrives after a successful refresh reuses its result.
    pub async fn refresh(&self) -> Result<Arc<CacheEntry>, DiscoveryError> {
        let key = self.key();
        let _guard = self.cache.update_lock.lock().await;
        if let Some(entry) = self.cache.get(&key) {
            if !entry.is_expired(Utc::now()) {
                return Ok(entry);
            }
        }

        let resp = self.query_directory().await?;
        let entry = self.cache.insert(&key, CacheEntry::new(resp, Utc::now()));
        info!(
            bucket = %self.bucket,
            expires = %entry.expired_at,
            "host cache refreshed"
        );
        self.cache.persist_in_background();
        Ok(entry)
    }

    fn spawn_refresh(&self) {
        let queryer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queryer.refresh().await {
                warn!(bucket = %queryer.bucket, error = %e, "background host refresh failed");
            }
        });
    }

    async fn query_directory(&self) -> Result<QueryResponse, DiscoveryError> {
        let tracker = self.cache.tracker();
        let mut last_err = DiscoveryError::NoDirectoryHosts;

        for attempt in 1..=MAX_QUERY_ATTEMPTS {
            let Some(host) = self.selector.select(&self.uc_hosts) else {
                return Err(DiscoveryError::NoDirectoryHosts);
            };
            match self.query_once(host).await {
                Ok(resp) if !resp.hosts.is_empty() => {
                    tracker.succeed(host);
                    return Ok(resp);
                }
                Ok(_) => {
                    debug!(host, attempt, "directory returned no host groups");
                    last_err = DiscoveryError::EmptyResponse;
                }
                Err(e) => {
                    tracker.fail(host);
                    warn!(host, attempt, error = %e, "directory query failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn query_once(&self, host: &str) -> Result<QueryResponse, DiscoveryError> {
        let url = format!("{}/v4/query", host.trim_end_matches('/'));
        let resp = self
            .cache
            .http
            .get(&url)
            .query(&[("ak", &self.access_key), ("bucket", &self.bucket)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DiscoveryError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn key(&self) -> String {
        cache_key(&self.bucket, &self.access_key)
    }
}
