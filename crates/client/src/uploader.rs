use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use partsync_hosts::HostSelector;
use partsync_protocol::ServiceRole;
use partsync_transfer::DataSource;
use partsync_upload::{
    MultipartUploader, RetryPolicy, StreamUploader, UploadApi, UploadClient, UploadConfig,
    UploadError, UploadExtra,
};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ClientError;
use crate::account::Account;
use crate::hosts::HostSource;
use crate::token::{TokenSource, upload_policy};

/// Whole-upload attempts made by each facade call.
pub const UPLOAD_ATTEMPTS: u32 = 3;

/// Uploads objects into one bucket.
///
/// Host lists, the discovery cache and the upload host cursor come from the
/// [`Account`], so every uploader of an account continues one round-robin.
pub struct Uploader {
    bucket: String,
    hosts: HostSource,
    selector: Arc<HostSelector>,
    tokens: Arc<dyn TokenSource>,
    api: Arc<dyn UploadApi>,
    config: UploadConfig,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("bucket", &self.bucket)
            .field("hosts", &self.hosts)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    pub fn new(account: &Account, tokens: Arc<dyn TokenSource>) -> Result<Self, ClientError> {
        let api: Arc<dyn UploadApi> = Arc::new(UploadClient::new()?);
        Ok(Self::with_api(account, tokens, api))
    }

    /// Uses `api` instead of the HTTP client.
    pub fn with_api(
        account: &Account,
        tokens: Arc<dyn TokenSource>,
        api: Arc<dyn UploadApi>,
    ) -> Self {
        let config = account.config();
        Self {
            bucket: config.bucket.clone(),
            hosts: account.host_source(ServiceRole::Up),
            selector: account.selector(ServiceRole::Up),
            tokens,
            api,
            config: config.upload_config(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads a file. Files no larger than one part go out as a single put.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ClientError> {
        let key = key.trim_start_matches('/');
        let token = self.token(key)?;
        let source = DataSource::file(path.as_ref())
            .await
            .map_err(UploadError::from)?;
        let engine = self.multipart().await;
        let extra = UploadExtra {
            notify: Some(Arc::new(|part: u32, etag: &str| {
                tracing::debug!(part, etag, "part uploaded");
            })),
            ..Default::default()
        };

        let single = source.len() <= self.config.part_size;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let res = if single {
                engine.put(&token, Some(key), &source, &extra, cancel).await
            } else {
                engine.upload(&token, Some(key), &source, &extra, cancel).await
            };
            match res {
                Ok(ret) => {
                    info!(key, size = source.len(), single, "file uploaded");
                    return Ok(ret);
                }
                Err(e) if attempt < UPLOAD_ATTEMPTS && worth_retrying(&e) => {
                    warn!(key, attempt, error = %e, "upload failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Uploads an in-memory buffer with a single put.
    pub async fn upload_data(
        &self,
        data: impl Into<Bytes>,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ClientError> {
        let key = key.trim_start_matches('/');
        let token = self.token(key)?;
        let source = DataSource::memory(data);
        let engine = self.multipart().await;
        let extra = UploadExtra::default();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match engine.put(&token, Some(key), &source, &extra, cancel).await {
                Ok(ret) => return Ok(ret),
                Err(e) if attempt < UPLOAD_ATTEMPTS && worth_retrying(&e) => {
                    warn!(key, attempt, error = %e, "put failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Uploads everything `reader` yields. The reader is consumed once, so
    /// only the engine's own per-call retries apply.
    pub async fn upload_reader<R>(
        &self,
        reader: R,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ClientError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let key = key.trim_start_matches('/');
        let token = self.token(key)?;
        let hosts = self.hosts.resolve().await;
        let engine = StreamUploader::with_selector(
            self.api.clone(),
            hosts,
            self.selector.clone(),
            self.config.clone(),
        );
        let ret = engine
            .upload(&token, Some(key), reader, &UploadExtra::default(), cancel)
            .await?;
        info!(key, "stream uploaded");
        Ok(ret)
    }

    fn token(&self, key: &str) -> Result<String, ClientError> {
        let policy = upload_policy(&self.bucket, key, Utc::now());
        self.tokens.upload_token(&policy)
    }

    async fn multipart(&self) -> MultipartUploader {
        let hosts = self.hosts.resolve().await;
        MultipartUploader::with_selector(
            self.api.clone(),
            hosts,
            self.selector.clone(),
            self.config.clone(),
        )
    }
}

/// Failures that another full attempt cannot fix.
fn worth_retrying(err: &UploadError) -> bool {
    !matches!(
        err.cause(),
        UploadError::Cancelled
            | UploadError::EmptySource
            | UploadError::InvalidToken(_)
            | UploadError::NoHosts
            | UploadError::PartLayout(_)
    )
}
