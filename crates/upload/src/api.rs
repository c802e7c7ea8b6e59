//! The upload service seam.
//!
//! `UploadApi` is one round trip per call against one host, with no
//! retries. The engines own retry, host selection and health tracking;
//! [`UploadClient`](crate::client::UploadClient) is the HTTP
//! implementation and tests swap in an in-memory fake.

use std::future::Future;
use std::pin::Pin;

use partsync_protocol::{CompleteMultipart, UploadPartResponse};
use partsync_transfer::PartBody;

use crate::error::UploadError;
use crate::session::{ObjectTarget, UploadExtra, UploadSession};

/// Boxed future returned by [`UploadApi`] calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract connection to the upload service.
pub trait UploadApi: Send + Sync {
    /// Opens a multipart session and returns its upload id.
    fn init_parts<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        target: &'a ObjectTarget,
    ) -> ApiFuture<'a, String>;

    /// Sends one part and checks the service's checksum against the bytes sent.
    ///
    /// A mismatch is reported as [`UploadError::ChecksumMismatch`].
    fn upload_part<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        session: &'a UploadSession,
        part_number: u32,
        body: PartBody,
    ) -> ApiFuture<'a, UploadPartResponse>;

    /// Assembles the session's parts. `body` is sent as given.
    fn complete_parts<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        session: &'a UploadSession,
        body: &'a CompleteMultipart,
    ) -> ApiFuture<'a, serde_json::Value>;

    /// Deletes a session and whatever parts it holds.
    fn delete_parts<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        session: &'a UploadSession,
    ) -> ApiFuture<'a, ()>;

    /// Uploads a whole object in one request.
    fn put<'a>(
        &'a self,
        host: &'a str,
        token: &'a str,
        target: &'a ObjectTarget,
        body: PartBody,
        extra: &'a UploadExtra,
    ) -> ApiFuture<'a, serde_json::Value>;
}
