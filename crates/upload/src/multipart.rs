use std::io;
use std::sync::Arc;

use partsync_hosts::{HostHealthTracker, HostSelector};
use partsync_transfer::{DataSource, PartSpec, plan_custom_parts, plan_parts};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::UploadApi;
use crate::engine::{Engine, UploadConfig, keep_primary};
use crate::error::UploadError;
use crate::session::{
    CompletedPart, Lifecycle, ObjectTarget, SessionState, UploadExtra, UploadSession,
};

/// Uploads sources of known length as concurrent, independently retried parts.
///
/// Cheap to clone; clones share the host cursor.
#[derive(Debug, Clone)]
pub struct MultipartUploader {
    engine: Arc<Engine>,
}

impl MultipartUploader {
    pub fn new(
        api: Arc<dyn UploadApi>,
        hosts: Vec<String>,
        tracker: Arc<HostHealthTracker>,
        config: UploadConfig,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(api, hosts, tracker, config)),
        }
    }

    /// Picks hosts through `selector`, so sessions from separate uploaders
    /// continue one round-robin instead of each starting at the first host.
    pub fn with_selector(
        api: Arc<dyn UploadApi>,
        hosts: Vec<String>,
        selector: Arc<HostSelector>,
        config: UploadConfig,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::with_selector(api, hosts, selector, config)),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.engine.config
    }

    /// Uploads `source` in parts of the configured size and returns the
    /// service's object descriptor.
    pub async fn upload(
        &self,
        token: &str,
        key: Option<&str>,
        source: &DataSource,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        if source.is_empty() {
            return Err(UploadError::EmptySource);
        }
        let parts = plan_parts(source.len(), self.engine.config.part_size)?;
        self.run(token, key, source, parts, extra, cancel).await
    }

    /// Like [`upload`](Self::upload) with explicit part sizes, which must
    /// add up to the source length.
    pub async fn upload_with_parts(
        &self,
        token: &str,
        key: Option<&str>,
        source: &DataSource,
        part_sizes: &[u64],
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        if source.is_empty() {
            return Err(UploadError::EmptySource);
        }
        let parts = plan_custom_parts(source.len(), part_sizes)?;
        self.run(token, key, source, parts, extra, cancel).await
    }

    /// Uploads `source` in a single request, without a session.
    pub async fn put(
        &self,
        token: &str,
        key: Option<&str>,
        source: &DataSource,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        let target = ObjectTarget::from_token(token, key)?;
        self.engine
            .put(token, &target, source.whole(), extra, cancel)
            .await
    }

    async fn run(
        &self,
        token: &str,
        key: Option<&str>,
        source: &DataSource,
        parts: Vec<PartSpec>,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        let target = ObjectTarget::from_token(token, key)?;
        let upload_id = self.engine.init(token, &target, cancel).await?;
        let session = Arc::new(UploadSession {
            upload_id,
            target,
            part_size: self.engine.config.part_size,
            total_size: Some(source.len()),
        });

        let mut lifecycle = Lifecycle::new(&session.upload_id);
        lifecycle.advance(SessionState::PartsInFlight);
        info!(
            upload_id = %session.upload_id,
            size = source.len(),
            parts = parts.len(),
            "uploading parts"
        );

        let result = self
            .upload_parts(token, &session, source, parts, extra, cancel)
            .await;
        self.engine
            .conclude(token, &session, &mut lifecycle, result, extra, cancel)
            .await
    }

    async fn upload_parts(
        &self,
        token: &str,
        session: &Arc<UploadSession>,
        source: &DataSource,
        parts: Vec<PartSpec>,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let expected = parts.len();
        let cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.engine.concurrency()));
        let token: Arc<str> = Arc::from(token);
        let extra = Arc::new(extra.clone());
        let mut tasks = JoinSet::new();

        for spec in parts {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let engine = self.engine.clone();
            let session = session.clone();
            let token = token.clone();
            let extra = extra.clone();
            let cancel = cancel.clone();
            let body = source.part(&spec);

            tasks.spawn(async move {
                let _permit = permit;
                match engine
                    .upload_part(&token, &session, spec.number, body, &cancel)
                    .await
                {
                    Ok(resp) => {
                        extra.notify(spec.number, &resp.etag);
                        Ok(CompletedPart {
                            part_number: spec.number,
                            size: spec.size,
                            etag: resp.etag,
                            checksum: resp.md5,
                        })
                    }
                    Err(e) => {
                        cancel.cancel();
                        Err(e)
                    }
                }
            });
        }

        let mut completed = Vec::with_capacity(expected);
        let mut primary = None;
        while let Some(joined) = tasks.join_next().await {
            let res = joined.unwrap_or_else(|e| Err(UploadError::Io(io::Error::other(e))));
            match res {
                Ok(part) => completed.push(part),
                Err(e) => {
                    cancel.cancel();
                    primary = Some(keep_primary(primary, e));
                }
            }
        }

        if let Some(e) = primary {
            return Err(e);
        }
        if completed.len() != expected {
            return Err(UploadError::Cancelled);
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::retry::RetryPolicy;
    use crate::testing::{FakeApi, Reply, token_for};

    const MIB: u64 = 1024 * 1024;

    fn uploader(api: Arc<FakeApi>, part_size: u64, concurrency: usize) -> MultipartUploader {
        MultipartUploader::new(
            api,
            vec!["http://up-a".into(), "http://up-b".into()],
            Arc::new(HostHealthTracker::default()),
            UploadConfig {
                part_size,
                concurrency,
                retry: RetryPolicy::immediate(),
            },
        )
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn ten_mib_file_in_three_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("video.bin");
        let data = pattern(10 * MIB as usize);
        std::fs::write(&path, &data).unwrap();

        let api = Arc::new(FakeApi::default());
        let up = uploader(api.clone(), 4 * MIB, 4);
        let source = DataSource::file(&path).await.unwrap();

        let ret = up
            .upload(
                &token_for("bkt"),
                Some("video.bin"),
                &source,
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(ret["hash"], "fake-hash");

        assert_eq!(api.uploaded(1).unwrap().len() as u64, 4 * MIB);
        assert_eq!(api.uploaded(2).unwrap().len() as u64, 4 * MIB);
        assert_eq!(api.uploaded(3).unwrap().len() as u64, 2 * MIB);
        let mut joined = api.uploaded(1).unwrap();
        joined.extend(api.uploaded(2).unwrap());
        joined.extend(api.uploaded(3).unwrap());
        assert_eq!(joined, data);

        let completions = api.completions();
        assert_eq!(completions.len(), 1);
        let numbers: Vec<u32> = completions[0].parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(completions[0].parts[1].etag, "etag-2");
        assert_eq!(api.delete_calls(), 0);
    }

    #[tokio::test]
    async fn failed_part_aborts_once_and_surfaces_part_error() {
        let api = Arc::new(FakeApi::default());
        for _ in 0..5 {
            api.script_part(2, Reply::Status(503));
        }
        let up = uploader(api.clone(), 4, 1);
        let source = DataSource::memory(pattern(12));

        let err = up
            .upload(
                &token_for("bkt"),
                None,
                &source,
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert!(!matches!(err, UploadError::AbortFailed { .. }));
        assert_eq!(api.part_attempts(2), 5);
        assert_eq!(api.delete_calls(), 1);
        assert_eq!(api.complete_calls(), 0);
    }

    #[tokio::test]
    async fn checksum_mismatches_exhaust_part_budget() {
        let api = Arc::new(FakeApi::default());
        for _ in 0..5 {
            api.script_part(1, Reply::BadChecksum);
        }
        let up = uploader(api.clone(), 4, 1);

        let err = up
            .upload(
                &token_for("bkt"),
                Some("k"),
                &DataSource::memory(pattern(4)),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ChecksumMismatch { part_number: 1, .. }));
        assert_eq!(api.part_attempts(1), 5);
        assert!(api.uploaded(1).is_none());
        assert_eq!(api.complete_calls(), 0);
        assert_eq!(api.delete_calls(), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_keeps_original_cause() {
        let api = Arc::new(FakeApi::default());
        api.script_part(1, Reply::Status(400));
        api.script_delete(Reply::Status(404));
        let up = uploader(api.clone(), 4, 2);
        let source = DataSource::memory(pattern(8));

        let err = up
            .upload(
                &token_for("bkt"),
                Some("k"),
                &source,
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match &err {
            UploadError::AbortFailed { cause, cleanup } => {
                assert_eq!(cause.status(), Some(400));
                assert_eq!(cleanup.status(), Some(404));
            }
            other => panic!("expected AbortFailed, got {other:?}"),
        }
        assert_eq!(err.cause().status(), Some(400));
    }

    #[tokio::test]
    async fn empty_source_rejected_before_network() {
        let api = Arc::new(FakeApi::default());
        let up = uploader(api.clone(), 4, 2);

        let err = up
            .upload(
                &token_for("bkt"),
                None,
                &DataSource::memory(Vec::new()),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptySource));
        assert_eq!(api.init_calls(), 0);
    }

    #[tokio::test]
    async fn init_failure_is_not_retried() {
        let api = Arc::new(FakeApi::default());
        api.script_init(Reply::Status(503));
        let up = uploader(api.clone(), 4, 2);

        let err = up
            .upload(
                &token_for("bkt"),
                None,
                &DataSource::memory(pattern(8)),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(api.init_calls(), 1);
        assert_eq!(api.delete_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_token_rejected() {
        let api = Arc::new(FakeApi::default());
        let up = uploader(api.clone(), 4, 2);

        let err = up
            .upload(
                "not-a-token",
                None,
                &DataSource::memory(pattern(8)),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidToken(_)));
        assert_eq!(api.init_calls(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let api = Arc::new(FakeApi::default());
        api.set_part_delay(Duration::from_millis(20));
        let up = uploader(api.clone(), 4, 3);

        up.upload(
            &token_for("bkt"),
            None,
            &DataSource::memory(pattern(40)),
            &UploadExtra::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(api.peak_in_flight() <= 3);
        assert_eq!(api.completions()[0].parts.len(), 10);
    }

    #[tokio::test]
    async fn caller_cancel_stops_parts_and_deletes_session() {
        let api = Arc::new(FakeApi::default());
        api.set_part_delay(Duration::from_secs(30));
        let up = uploader(api.clone(), 4, 2);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = up
            .upload(
                &token_for("bkt"),
                None,
                &DataSource::memory(pattern(16)),
                &UploadExtra::default(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(api.part_attempts(1), 1);
        assert_eq!(api.part_attempts(3), 0);
        assert_eq!(api.delete_calls(), 1);
        assert_eq!(api.complete_calls(), 0);
    }

    #[tokio::test]
    async fn completion_extras_and_notify() {
        let api = Arc::new(FakeApi::default());
        let up = uploader(api.clone(), 4, 2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut extra = UploadExtra {
            fname: "report.csv".into(),
            mime_type: "text/csv".into(),
            notify: Some(Arc::new(move |n: u32, etag: &str| {
                sink.lock().unwrap().push((n, etag.to_string()));
            })),
            ..Default::default()
        };
        extra.metadata.insert("owner".into(), "ops".into());
        extra.custom_vars.insert("x:batch".into(), "7".into());

        up.upload(
            &token_for("bkt"),
            Some("report.csv"),
            &DataSource::memory(pattern(10)),
            &extra,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let body = &api.completions()[0];
        assert_eq!(body.fname, "report.csv");
        assert_eq!(body.mime_type, "text/csv");
        assert_eq!(body.metadata.get("x-qn-meta-owner").map(String::as_str), Some("ops"));
        assert!(!body.metadata.contains_key("owner"));
        assert_eq!(body.custom_vars.get("x:batch").map(String::as_str), Some("7"));

        let mut notified = seen.lock().unwrap().clone();
        notified.sort();
        assert_eq!(
            notified,
            vec![
                (1, "etag-1".to_string()),
                (2, "etag-2".to_string()),
                (3, "etag-3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn custom_part_layout() {
        let api = Arc::new(FakeApi::default());
        let up = uploader(api.clone(), 4, 2);
        let source = DataSource::memory(pattern(10));

        up.upload_with_parts(
            &token_for("bkt"),
            None,
            &source,
            &[3, 7],
            &UploadExtra::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(api.uploaded(1).unwrap().len(), 3);
        assert_eq!(api.uploaded(2).unwrap().len(), 7);

        let err = up
            .upload_with_parts(
                &token_for("bkt"),
                None,
                &source,
                &[3, 3],
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PartLayout(_)));
    }

    #[tokio::test]
    async fn completion_already_done_counts_as_success() {
        let api = Arc::new(FakeApi::default());
        api.script_complete(Reply::Status(612));
        let up = uploader(api.clone(), 4, 2);

        let ret = up
            .upload(
                &token_for("bkt"),
                None,
                &DataSource::memory(pattern(6)),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(ret.is_null());
        assert_eq!(api.delete_calls(), 0);
    }

    #[tokio::test]
    async fn single_shot_put() {
        let api = Arc::new(FakeApi::default());
        let up = uploader(api.clone(), 4, 2);

        let ret = up
            .put(
                &token_for("bkt"),
                Some("small.txt"),
                &DataSource::memory(b"hi".to_vec()),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(ret["key"], "put-key");
        assert_eq!(api.put_bodies(), vec![b"hi".to_vec()]);
        assert_eq!(api.init_calls(), 0);
    }

    #[tokio::test]
    async fn uploaders_sharing_a_selector_rotate_hosts() {
        let api = Arc::new(FakeApi::default());
        let selector = Arc::new(HostSelector::new(Arc::new(HostHealthTracker::default())));
        let hosts = vec!["http://up-a".to_string(), "http://up-b".to_string()];

        for _ in 0..4 {
            let up = MultipartUploader::with_selector(
                api.clone(),
                hosts.clone(),
                selector.clone(),
                UploadConfig::default(),
            );
            up.put(
                &token_for("bkt"),
                Some("k"),
                &DataSource::memory(b"x".to_vec()),
                &UploadExtra::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        }
        assert_eq!(api.host_hits("http://up-a"), 2);
        assert_eq!(api.host_hits("http://up-b"), 2);
    }
}
