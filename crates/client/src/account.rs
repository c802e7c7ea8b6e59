use std::sync::Arc;

use partsync_discovery::{EndpointCache, Queryer};
use partsync_hosts::{HostHealthTracker, HostSelector, shuffle_hosts};
use partsync_protocol::ServiceRole;

use crate::ClientError;
use crate::config::Config;
use crate::downloader::Downloader;
use crate::hosts::HostSource;
use crate::token::TokenSource;
use crate::uploader::Uploader;

/// State shared by every uploader and downloader of one account.
///
/// Holds the host health tracker, a single endpoint cache and one host
/// cursor per role. Configured host lists are shuffled once here so
/// separate processes start on different hosts. Clones share all of it.
#[derive(Debug, Clone)]
pub struct Account {
    config: Config,
    tracker: Arc<HostHealthTracker>,
    queryer: Option<Queryer>,
    up_hosts: Vec<String>,
    io_hosts: Vec<String>,
    up_selector: Arc<HostSelector>,
    io_selector: Arc<HostSelector>,
}

impl Account {
    pub fn new(config: Config) -> Result<Self, ClientError> {
        Self::with_tracker(config, Arc::new(HostHealthTracker::default()))
    }

    /// Uses `tracker` for host health, e.g. one shared with other accounts.
    pub fn with_tracker(
        config: Config,
        tracker: Arc<HostHealthTracker>,
    ) -> Result<Self, ClientError> {
        let queryer = build_queryer(&config, &tracker)?;
        Ok(Self {
            up_hosts: shuffle_hosts(config.up_hosts.clone()),
            io_hosts: shuffle_hosts(config.io_hosts.clone()),
            up_selector: Arc::new(HostSelector::new(tracker.clone())),
            io_selector: Arc::new(HostSelector::new(tracker.clone())),
            queryer,
            tracker,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<HostHealthTracker> {
        &self.tracker
    }

    /// The discovery cache, when `uc_hosts` is configured.
    pub fn endpoint_cache(&self) -> Option<&Arc<EndpointCache>> {
        self.queryer.as_ref().map(Queryer::cache)
    }

    pub fn uploader(&self, tokens: Arc<dyn TokenSource>) -> Result<Uploader, ClientError> {
        Uploader::new(self, tokens)
    }

    pub fn downloader(&self) -> Result<Downloader, ClientError> {
        Downloader::new(self)
    }

    pub(crate) fn host_source(&self, role: ServiceRole) -> HostSource {
        let fixed = match role {
            ServiceRole::Io => self.io_hosts.clone(),
            _ => self.up_hosts.clone(),
        };
        HostSource::new(role, fixed, self.queryer.clone(), self.config.https)
    }

    pub(crate) fn selector(&self, role: ServiceRole) -> Arc<HostSelector> {
        match role {
            ServiceRole::Io => self.io_selector.clone(),
            _ => self.up_selector.clone(),
        }
    }
}

fn build_queryer(
    config: &Config,
    tracker: &Arc<HostHealthTracker>,
) -> Result<Option<Queryer>, ClientError> {
    if config.uc_hosts.is_empty() {
        return Ok(None);
    }
    let cache = EndpointCache::new(tracker.clone())?;
    let cache = match &config.cache_dir {
        Some(dir) => cache.with_cache_dir(dir),
        None => cache.with_default_cache_dir(),
    };
    Ok(Some(Queryer::new(
        Arc::new(cache),
        config.ak.clone(),
        config.bucket.clone(),
        config.uc_hosts.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Directory listing `up.example` and `io.example`, counting queries.
    async fn mock_directory() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let body = r#"{"hosts":[{"ttl":600,"up":{"domains":["up.example"]},"io":{"domains":["io.example"]}}]}"#;

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (url, hits)
    }

    #[tokio::test]
    async fn roles_share_one_directory_lookup() {
        let (uc, hits) = mock_directory().await;
        let tmp = tempfile::tempdir().unwrap();
        let account = Account::new(Config {
            uc_hosts: vec![uc],
            bucket: "bkt".into(),
            ak: "AK".into(),
            cache_dir: Some(tmp.path().to_path_buf()),
            ..Config::default()
        })
        .unwrap();

        let up = account.host_source(ServiceRole::Up).resolve().await;
        let io = account.clone().host_source(ServiceRole::Io).resolve().await;
        assert_eq!(up, vec!["http://up.example"]);
        assert_eq!(io, vec!["http://io.example"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_cache_and_cursors() {
        let tmp = tempfile::tempdir().unwrap();
        let account = Account::new(Config {
            uc_hosts: vec!["http://127.0.0.1:1".into()],
            cache_dir: Some(tmp.path().to_path_buf()),
            ..Config::default()
        })
        .unwrap();
        let other = account.clone();

        assert!(Arc::ptr_eq(
            account.endpoint_cache().unwrap(),
            other.endpoint_cache().unwrap()
        ));
        assert!(Arc::ptr_eq(
            &account.selector(ServiceRole::Up),
            &other.selector(ServiceRole::Up)
        ));
        assert!(!Arc::ptr_eq(
            &account.selector(ServiceRole::Up),
            &account.selector(ServiceRole::Io)
        ));
    }

    #[test]
    fn no_directory_means_no_cache() {
        let account = Account::new(Config::default()).unwrap();
        assert!(account.endpoint_cache().is_none());
    }
}
