use chrono::{DateTime, Utc};
use partsync_protocol::PutPolicy;

use crate::ClientError;

/// How long a minted upload token stays valid, in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 24 * 3600;

/// Produces upload tokens for a put policy.
///
/// Signing is the caller's concern; the uploader only builds the policy.
pub trait TokenSource: Send + Sync {
    fn upload_token(&self, policy: &PutPolicy) -> Result<String, ClientError>;
}

/// Always hands out the same pre-signed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn upload_token(&self, _policy: &PutPolicy) -> Result<String, ClientError> {
        Ok(self.0.clone())
    }
}

impl<F> TokenSource for F
where
    F: Fn(&PutPolicy) -> Result<String, ClientError> + Send + Sync,
{
    fn upload_token(&self, policy: &PutPolicy) -> Result<String, ClientError> {
        self(policy)
    }
}

/// Policy allowing an upload to `bucket:key` for [`TOKEN_LIFETIME_SECS`].
pub fn upload_policy(bucket: &str, key: &str, now: DateTime<Utc>) -> PutPolicy {
    PutPolicy {
        scope: format!("{bucket}:{key}"),
        deadline: (now.timestamp() + TOKEN_LIFETIME_SECS).max(0) as u64,
    }
}
