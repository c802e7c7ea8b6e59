//! Wire types for the object-storage upload and directory protocols.
//!
//! Everything here is a plain serde type or a pure helper; no I/O happens
//! in this crate.
//!
//! # Upload session protocol
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | init | `POST {host}/buckets/{bucket}/objects/{key}/uploads` | [`InitPartsResponse`] |
//! | part | `PUT .../uploads/{uploadId}/{partNumber}` (octet-stream) | [`UploadPartResponse`] |
//! | complete | `POST .../uploads/{uploadId}` with [`CompleteMultipart`] | object descriptor |
//! | abort | `DELETE .../uploads/{uploadId}` | empty |

pub mod messages;
pub mod path;
pub mod query;
pub mod token;

pub use messages::{CompleteMultipart, InitPartsResponse, Part, PutRet, UploadPartResponse};
pub use path::{encode_key, part_url, put_url, session_url, uploads_url};
pub use query::{HostGroup, QueryResponse, ServiceDomains, ServiceRole};
pub use token::{PutPolicy, TokenScope, parse_upload_token};

/// Errors produced while decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid upload token: {0}")]
    InvalidToken(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
