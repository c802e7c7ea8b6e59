//! Upload error types.

use partsync_protocol::ProtocolError;
use partsync_transfer::TransferError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while uploading.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Connection, timeout or body streaming failure.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The service answered with a non-success status.
    #[error("service error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("part {part_number} checksum mismatch: sent {expected}, service saw {actual}")]
    ChecksumMismatch {
        part_number: u32,
        expected: String,
        actual: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("can't upload an empty source")]
    EmptySource,

    #[error("invalid upload token: {0}")]
    InvalidToken(#[from] ProtocolError),

    #[error("no upload hosts configured")]
    NoHosts,

    #[error("invalid part layout: {0}")]
    PartLayout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A part failed and deleting the session failed as well.
    #[error("{cause} (session cleanup also failed: {cleanup})")]
    AbortFailed {
        cause: Box<UploadError>,
        cleanup: Box<UploadError>,
    },
}

impl UploadError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// HTTP status carried by this error, if the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The error that made the upload fail, looking through cleanup failures.
    pub fn cause(&self) -> &UploadError {
        match self {
            Self::AbortFailed { cause, .. } => cause.cause(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause(), Self::Cancelled)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => Self::Io(e),
            TransferError::EmptySource => Self::EmptySource,
            other => Self::PartLayout(other.to_string()),
        }
    }
}
