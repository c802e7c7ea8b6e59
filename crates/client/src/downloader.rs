use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use partsync_hosts::HostSelector;
use partsync_protocol::ServiceRole;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::account::Account;
use crate::hosts::HostSource;

/// Attempts per download call.
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// A byte range of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `size` bytes starting at `offset`.
    From { offset: u64, size: u64 },
    /// The last `size` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Value for the `Range` request header, or `None` for a range that
    /// covers no bytes.
    pub fn header_value(&self) -> Option<String> {
        match *self {
            ByteRange::From { size: 0, .. } | ByteRange::Suffix(0) => None,
            ByteRange::From { offset, size } => {
                let last = offset.checked_add(size - 1)?;
                Some(format!("bytes={offset}-{last}"))
            }
            ByteRange::Suffix(size) => Some(format!("bytes=-{size}")),
        }
    }
}

/// Downloads objects from one bucket.
#[derive(Debug)]
pub struct Downloader {
    access_key: String,
    bucket: String,
    hosts: HostSource,
    selector: Arc<HostSelector>,
    http: reqwest::Client,
}

impl Downloader {
    pub fn new(account: &Account) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(1))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self::with_http_client(account, http))
    }

    pub fn with_http_client(account: &Account, http: reqwest::Client) -> Self {
        let config = account.config();
        Self {
            access_key: config.ak.clone(),
            bucket: config.bucket.clone(),
            hosts: account.host_source(ServiceRole::Io),
            selector: account.selector(ServiceRole::Io),
            http,
        }
    }

    /// Downloads a whole object into memory.
    pub async fn download_bytes(&self, key: &str) -> Result<Bytes, ClientError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch(key, None).await {
                Ok((_, data)) => return Ok(data),
                Err(e) if attempt < DOWNLOAD_ATTEMPTS && retryable(&e) => {
                    warn!(key, attempt, error = %e, "download failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Downloads `range` of an object. Returns the object's total length
    /// along with the bytes.
    pub async fn download_range(
        &self,
        key: &str,
        range: ByteRange,
    ) -> Result<(u64, Bytes), ClientError> {
        if range.header_value().is_none() {
            return Err(ClientError::EmptyRange(range));
        }
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch(key, Some(range)).await {
                Ok((total, data)) => return Ok((total.unwrap_or(0), data)),
                Err(e) if attempt < DOWNLOAD_ATTEMPTS && retryable(&e) => {
                    warn!(key, attempt, error = %e, "range download failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Downloads an object into `path`, continuing from whatever the file
    /// already holds. Returns the final file length.
    pub async fn download_file(
        &self,
        key: &str,
        path: impl AsRef<Path>,
    ) -> Result<u64, ClientError> {
        let path = path.as_ref();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.resume_into(key, path).await {
                Ok(len) => return Ok(len),
                Err(e) if attempt < DOWNLOAD_ATTEMPTS && retryable(&e) => {
                    warn!(key, attempt, error = %e, "file download failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pick_host(&self) -> Result<String, ClientError> {
        let hosts = self.hosts.resolve().await;
        self.selector
            .select(&hosts)
            .map(str::to_string)
            .ok_or(ClientError::NoHosts("io"))
    }

    fn url(&self, host: &str, key: &str) -> String {
        format!(
            "{}/getfile/{}/{}/{}",
            host.trim_end_matches('/'),
            self.access_key,
            self.bucket,
            key.trim_start_matches('/')
        )
    }

    async fn fetch(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<(Option<u64>, Bytes), ClientError> {
        let host = self.pick_host().await?;
        let tracker = self.selector.tracker();
        let mut req = self.http.get(self.url(&host, key));
        if let Some(range) = range {
            let value = range.header_value().ok_or(ClientError::EmptyRange(range))?;
            req = req.header(RANGE, value);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracker.fail(&host);
                return Err(e.into());
            }
        };
        let expected = if range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };
        if resp.status() != expected {
            tracker.fail(&host);
            return Err(api_error(resp).await);
        }

        let total = match range {
            Some(_) => {
                let header = resp
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                match total_length(&header) {
                    Some(total) => Some(total),
                    None => {
                        tracker.fail(&host);
                        return Err(ClientError::ContentRange(header));
                    }
                }
            }
            None => None,
        };

        match resp.bytes().await {
            Ok(data) => {
                tracker.succeed(&host);
                debug!(host, key, len = data.len(), "downloaded");
                Ok((total, data))
            }
            Err(e) => {
                tracker.fail(&host);
                Err(e.into())
            }
        }
    }

    async fn resume_into(&self, key: &str, path: &Path) -> Result<u64, ClientError> {
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;
        let have = file.seek(SeekFrom::End(0)).await?;

        let host = self.pick_host().await?;
        let tracker = self.selector.tracker();
        let mut req = self.http.get(self.url(&host, key));
        if have > 0 {
            req = req.header(RANGE, format!("bytes={have}-"));
            debug!(key, offset = have, "resuming download");
        }

        let mut resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracker.fail(&host);
                return Err(e.into());
            }
        };
        match resp.status() {
            StatusCode::RANGE_NOT_SATISFIABLE => {
                tracker.succeed(&host);
                return Ok(have);
            }
            StatusCode::OK if have > 0 => {
                // Range ignored; the body is the whole object.
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
            }
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
            _ => {
                tracker.fail(&host);
                return Err(api_error(resp).await);
            }
        }
        tracker.succeed(&host);

        let expected = resp.content_length();
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        if let Some(expected) = expected.filter(|&n| n != written) {
            warn!(key, expected, written, "download length differs from Content-Length");
        }

        let len = file.seek(SeekFrom::End(0)).await?;
        info!(key, path = %path.display(), len, "file downloaded");
        Ok(len)
    }
}

async fn api_error(resp: reqwest::Response) -> ClientError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ClientError::Api { status, body }
}

/// Total object length from a `Content-Range` value such as `bytes 0-9/100`.
fn total_length(content_range: &str) -> Option<u64> {
    let (_, total) = content_range.split_once('/')?;
    total.trim().parse().ok()
}

fn retryable(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Http(_) | ClientError::Api { .. } | ClientError::ContentRange(_)
    )
}
