use std::sync::Arc;

use partsync_hosts::{HostHealthTracker, HostSelector};
use partsync_protocol::{CompleteMultipart, UploadPartResponse};
use partsync_transfer::{DEFAULT_PART_SIZE, PartBody};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::UploadApi;
use crate::error::UploadError;
use crate::retry::{CompleteVerdict, PartVerdict, RetryPolicy, sleep_or_cancel};
use crate::session::{
    CompletedPart, Lifecycle, ObjectTarget, SessionState, UploadExtra, UploadSession,
};

/// Settings shared by the bulk and streaming engines.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bytes per part.
    pub part_size: u64,
    /// Parts uploaded at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Host selection, health bookkeeping and the retry loops around each call.
pub(crate) struct Engine {
    api: Arc<dyn UploadApi>,
    hosts: Vec<String>,
    selector: Arc<HostSelector>,
    pub(crate) config: UploadConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("hosts", &self.hosts)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn new(
        api: Arc<dyn UploadApi>,
        hosts: Vec<String>,
        tracker: Arc<HostHealthTracker>,
        config: UploadConfig,
    ) -> Self {
        Self::with_selector(api, hosts, Arc::new(HostSelector::new(tracker)), config)
    }

    /// Engine whose host cursor is shared with other engines.
    pub(crate) fn with_selector(
        api: Arc<dyn UploadApi>,
        hosts: Vec<String>,
        selector: Arc<HostSelector>,
        config: UploadConfig,
    ) -> Self {
        Self {
            api,
            hosts,
            selector,
            config,
        }
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    fn choose_host(&self) -> Result<&str, UploadError> {
        self.selector.select(&self.hosts).ok_or(UploadError::NoHosts)
    }

    fn record(&self, host: &str, err: Option<&UploadError>) {
        let tracker = self.selector.tracker();
        let healthy = match err {
            None => Some(true),
            Some(e) => self.config.retry.host_healthy(e),
        };
        match healthy {
            Some(true) => tracker.succeed(host),
            Some(false) => tracker.fail(host),
            None => {}
        }
    }

    /// Opens a session. Single attempt.
    pub(crate) async fn init(
        &self,
        token: &str,
        target: &ObjectTarget,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let host = self.choose_host()?;
        let res = tokio::select! {
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            r = self.api.init_parts(host, token, target) => r,
        };
        match res {
            Ok(upload_id) => {
                self.record(host, None);
                info!(host, %upload_id, bucket = %target.bucket, "upload session opened");
                Ok(upload_id)
            }
            Err(e) => {
                self.record(host, Some(&e));
                warn!(host, error = %e, "failed to open upload session");
                Err(e)
            }
        }
    }

    /// Uploads one part, picking a host per attempt.
    pub(crate) async fn upload_part(
        &self,
        token: &str,
        session: &UploadSession,
        part_number: u32,
        body: PartBody,
        cancel: &CancellationToken,
    ) -> Result<UploadPartResponse, UploadError> {
        let policy = &self.config.retry;
        let mut spent = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            let host = self.choose_host()?;
            let res = tokio::select! {
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                r = self.api.upload_part(host, token, session, part_number, body.clone()) => r,
            };
            let err = match res {
                Ok(resp) => {
                    self.record(host, None);
                    return Ok(resp);
                }
                Err(e) => e,
            };
            self.record(host, Some(&err));

            match policy.classify_part(&err) {
                PartVerdict::Throttled => {
                    let delay = policy.throttle_delay();
                    debug!(host, part = part_number, ?delay, "rate limited");
                    sleep_or_cancel(cancel, delay).await?;
                }
                PartVerdict::Retry => {
                    spent += 1;
                    if spent >= policy.part_attempts {
                        error!(host, part = part_number, attempts = spent, error = %err, "part failed");
                        return Err(err);
                    }
                    warn!(host, part = part_number, attempt = spent, error = %err, "part failed, retrying");
                    sleep_or_cancel(cancel, policy.backoff).await?;
                }
                PartVerdict::Fail | PartVerdict::Cancelled => return Err(err),
            }
        }
    }

    /// Assembles the session. Configured "already done" statuses count as success
    /// and yield a null descriptor.
    pub(crate) async fn complete(
        &self,
        token: &str,
        session: &UploadSession,
        body: &CompleteMultipart,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        let policy = &self.config.retry;
        let wire = body.to_wire();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let host = self.choose_host()?;
            let res = tokio::select! {
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                r = self.api.complete_parts(host, token, session, &wire) => r,
            };
            let err = match res {
                Ok(ret) => {
                    self.record(host, None);
                    return Ok(ret);
                }
                Err(e) => e,
            };
            self.record(host, Some(&err));

            match policy.classify_complete(&err) {
                CompleteVerdict::AlreadyDone => {
                    info!(host, upload_id = %session.upload_id, status = ?err.status(), "object already assembled");
                    return Ok(serde_json::Value::Null);
                }
                CompleteVerdict::Retry if attempt < policy.complete_attempts => {
                    warn!(host, attempt, error = %err, "completion failed, retrying");
                    sleep_or_cancel(cancel, policy.backoff).await?;
                }
                _ => return Err(err),
            }
        }
    }

    /// Deletes a session. Runs to the end of its budget even if the
    /// upload was cancelled.
    pub(crate) async fn abort(&self, token: &str, session: &UploadSession) -> Result<(), UploadError> {
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let host = self.choose_host()?;
            let err = match self.api.delete_parts(host, token, session).await {
                Ok(()) => {
                    self.record(host, None);
                    info!(host, upload_id = %session.upload_id, "upload session deleted");
                    return Ok(());
                }
                Err(e) => e,
            };
            self.record(host, Some(&err));

            if !policy.should_retry_abort(&err) || attempt >= policy.abort_attempts {
                error!(host, upload_id = %session.upload_id, error = %err, "failed to delete upload session");
                return Err(err);
            }
            warn!(host, attempt, error = %err, "session delete failed, retrying");
            tokio::time::sleep(policy.backoff).await;
        }
    }

    /// Uploads a whole object in one request.
    pub(crate) async fn put(
        &self,
        token: &str,
        target: &ObjectTarget,
        body: PartBody,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let host = self.choose_host()?;
            let res = tokio::select! {
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                r = self.api.put(host, token, target, body.clone(), extra) => r,
            };
            let err = match res {
                Ok(ret) => {
                    self.record(host, None);
                    debug!(host, size = body.len(), "single-shot put done");
                    return Ok(ret);
                }
                Err(e) => e,
            };
            self.record(host, Some(&err));

            let delay = match policy.classify_part(&err) {
                PartVerdict::Throttled => policy.throttle_delay(),
                PartVerdict::Retry => policy.backoff,
                PartVerdict::Fail | PartVerdict::Cancelled => return Err(err),
            };
            if attempt >= policy.put_attempts {
                return Err(err);
            }
            warn!(host, attempt, error = %err, "put failed, retrying");
            sleep_or_cancel(cancel, delay).await?;
        }
    }

    /// Finishes a session once its parts have settled: completes it when
    /// every part succeeded, otherwise deletes it and returns the part error.
    pub(crate) async fn conclude(
        &self,
        token: &str,
        session: &UploadSession,
        lifecycle: &mut Lifecycle,
        parts: Result<Vec<CompletedPart>, UploadError>,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        match parts {
            Ok(parts) => {
                lifecycle.advance(SessionState::Completing);
                let body = extra.completion(&parts);
                let ret = self.complete(token, session, &body, cancel).await?;
                lifecycle.advance(SessionState::Done);
                info!(upload_id = %session.upload_id, parts = parts.len(), "upload complete");
                Ok(ret)
            }
            Err(cause) => {
                lifecycle.advance(SessionState::Aborting);
                let cleanup = self.abort(token, session).await;
                lifecycle.advance(SessionState::Aborted);
                match cleanup {
                    Ok(()) => Err(cause),
                    Err(cleanup) => Err(UploadError::AbortFailed {
                        cause: Box::new(cause),
                        cleanup: Box::new(cleanup),
                    }),
                }
            }
        }
    }
}

/// Keeps the first meaningful error: a real failure beats a cancellation
/// that only cascaded from it.
pub(crate) fn keep_primary(primary: Option<UploadError>, next: UploadError) -> UploadError {
    match primary {
        Some(prev) if prev.is_cancelled() && !next.is_cancelled() => next,
        Some(prev) => prev,
        None => next,
    }
}
