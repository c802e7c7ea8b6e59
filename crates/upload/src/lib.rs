//! Chunked, resumable uploads to the object-storage service.
//!
//! [`MultipartUploader`] splits a file or buffer into parts, uploads them
//! concurrently with per-part retry and host failover, then assembles the
//! object. [`StreamUploader`] does the same for readers of unknown length.
//! Both go through the [`UploadApi`] seam; [`UploadClient`] is the HTTP
//! implementation.
//!
//! Small inputs skip the session entirely and go out as a single put.

pub mod api;
pub mod client;
pub mod engine;
pub mod error;
pub mod multipart;
pub mod retry;
pub mod session;
pub mod stream;

#[cfg(test)]
mod testing;

pub use api::{ApiFuture, UploadApi};
pub use client::UploadClient;
pub use engine::UploadConfig;
pub use error::UploadError;
pub use multipart::MultipartUploader;
pub use retry::{CompleteVerdict, PartVerdict, RetryPolicy};
pub use session::{
    CompletedPart, ObjectTarget, PartNotify, SessionState, UploadExtra, UploadSession,
};
pub use stream::StreamUploader;
