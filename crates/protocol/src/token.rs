//! Upload-token scope extraction.
//!
//! Tokens have the shape `accessKey:signature:base64(policyJson)`. Only the
//! policy's `scope` is read here; verifying the signature is the service's job.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Subset of the signed put policy the client needs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PutPolicy {
    pub scope: String,
    #[serde(default)]
    pub deadline: u64,
}

/// Bucket (and optional key) a token was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScope {
    pub access_key: String,
    pub bucket: String,
    pub key: Option<String>,
}

/// Extracts the access key and scope from an upload token.
pub fn parse_upload_token(token: &str) -> Result<TokenScope, ProtocolError> {
    let mut fields = token.splitn(3, ':');
    let (Some(access_key), Some(_sign), Some(encoded)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(ProtocolError::InvalidToken(
            "expected three ':'-separated fields".into(),
        ));
    };

    let raw = decode_policy(encoded)?;
    let policy: PutPolicy = serde_json::from_slice(&raw)?;
    if policy.scope.is_empty() {
        return Err(ProtocolError::InvalidToken("empty scope".into()));
    }

    let (bucket, key) = match policy.scope.split_once(':') {
        Some((bucket, key)) => (bucket.to_string(), Some(key.to_string())),
        None => (policy.scope.clone(), None),
    };
    if bucket.is_empty() {
        return Err(ProtocolError::InvalidToken("empty bucket in scope".into()));
    }

    Ok(TokenScope {
        access_key: access_key.to_string(),
        bucket,
        key,
    })
}

fn decode_policy(encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    if encoded.ends_with('=') {
        Ok(URL_SAFE.decode(encoded)?)
    } else {
        Ok(URL_SAFE_NO_PAD.decode(encoded)?)
    }
}
