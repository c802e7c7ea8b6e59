use std::time::Duration;

use partsync_protocol::{
    CompleteMultipart, InitPartsResponse, UploadPartResponse, part_url, put_url, session_url,
    uploads_url,
};
use partsync_transfer::{Checksummed, PartBody};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use crate::api::{ApiFuture, UploadApi};
use crate::error::UploadError;
use crate::session::{ObjectTarget, UploadExtra, UploadSession};

const OCTET_STREAM: &str = "application/octet-stream";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest a request may go without receiving any bytes.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP implementation of [`UploadApi`].
#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl UploadClient {
    pub fn new() -> Result<Self, UploadError> {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    /// A stalled host surfaces as a transport error once `read` elapses
    /// without data.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client, e.g. one with custom TLS or proxy settings.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Sends `req` and decodes a JSON response. An empty body decodes as null.
    async fn send<T>(&self, req: reqwest::RequestBuilder) -> Result<T, UploadError>
    where
        T: serde::de::DeserializeOwned,
    {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        if body.is_empty() {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

fn auth(token: &str) -> String {
    format!("UpToken {token}")
}

fn status_error(status: u16, body: &[u8]) -> UploadError {
    let message = match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    UploadError::Status { status, message }
}

impl UploadApi for UploadClient {
    fn init_parts<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        target: &'a ObjectTarget,
    ) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let url = uploads_url(host, &target.bucket, target.key());
            let resp: InitPartsResponse = self
                .send(self.http.post(url).header(AUTHORIZATION, auth(token)))
                .await?;
            Ok(resp.upload_id)
        })
    }

    fn upload_part<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        session: &'a UploadSession,
        part_number: u32,
        body: PartBody,
    ) -> ApiFuture<'a, UploadPartResponse> {
        Box::pin(async move {
            let target = &session.target;
            let url = part_url(
                host,
                &target.bucket,
                target.key(),
                &session.upload_id,
                part_number,
            );
            let len = body.len();
            let (stream, checksum) = Checksummed::new(body.open().await?);

            let req = self
                .http
                .put(url)
                .header(AUTHORIZATION, auth(token))
                .header(CONTENT_TYPE, OCTET_STREAM)
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(stream));
            let resp: UploadPartResponse = self.send(req).await?;

            let expected = checksum.hex();
            if resp.md5 != expected {
                return Err(UploadError::ChecksumMismatch {
                    part_number,
                    expected,
                    actual: resp.md5,
                });
            }
            debug!(host, part = part_number, etag = %resp.etag, "part acknowledged");
            Ok(resp)
        })
    }

    fn complete_parts<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        session: &'a UploadSession,
        body: &'a CompleteMultipart,
    ) -> ApiFuture<'a, serde_json::Value> {
        Box::pin(async move {
            let target = &session.target;
            let url = session_url(host, &target.bucket, target.key(), &session.upload_id);
            self.send(
                self.http
                    .post(url)
                    .header(AUTHORIZATION, auth(token))
                    .json(body),
            )
            .await
        })
    }

    fn delete_parts<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        session: &'a UploadSession,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let target = &session.target;
            let url = session_url(host, &target.bucket, target.key(), &session.upload_id);
            let resp = self
                .http
                .delete(url)
                .header(AUTHORIZATION, auth(token))
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.bytes().await.unwrap_or_default();
                return Err(status_error(status.as_u16(), &body));
            }
            Ok(())
        })
    }

    fn put<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        target: &'a ObjectTarget,
        body: PartBody,
        extra: &'a UploadExtra,
    ) -> ApiFuture<'a, serde_json::Value> {
        Box::pin(async move {
            let len = body.len();
            let url = put_url(host, len, target.key(), &extra.mime_type, &extra.custom_vars);
            let stream = body.open().await?;
            let req = self
                .http
                .post(url)
                .header(AUTHORIZATION, auth(token))
                .header(CONTENT_TYPE, OCTET_STREAM)
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(stream));
            self.send(req).await
        })
    }
}
