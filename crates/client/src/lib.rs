//! Account-level facade over the partsync crates.
//!
//! [`Uploader`] mints a token per object and picks single-shot or multipart
//! upload by size. [`Downloader`] fetches whole objects, byte ranges and
//! resumable files. Both are built from an [`Account`], which owns the
//! host health tracker, the endpoint cache used when `uc_hosts` is
//! configured, and the per-role host cursors.

pub mod account;
pub mod config;
pub mod downloader;
mod hosts;
pub mod token;
pub mod uploader;

pub use account::Account;
pub use config::{Config, MIN_PART_SIZE_MIB};
pub use downloader::{ByteRange, Downloader};
pub use token::{StaticToken, TokenSource, upload_policy};
pub use uploader::Uploader;

use partsync_discovery::DiscoveryError;
use partsync_upload::UploadError;

/// Errors for facade operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no {0} hosts configured")]
    NoHosts(&'static str),

    #[error("invalid Content-Range: {0:?}")]
    ContentRange(String),

    #[error("byte range {0:?} is empty")]
    EmptyRange(ByteRange),

    #[error("token error: {0}")]
    Token(String),
}
