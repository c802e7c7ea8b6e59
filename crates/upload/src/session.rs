//! Session, target and per-upload option types.

use std::collections::HashMap;
use std::sync::Arc;

use partsync_protocol::{CompleteMultipart, Part, parse_upload_token};
use tracing::debug;

use crate::error::UploadError;

/// Bucket and optional key an object is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    /// `None` lets the service assign the key.
    pub key: Option<String>,
}

impl ObjectTarget {
    /// Takes the bucket from the token's scope and pairs it with `key`.
    pub fn from_token(token: &str, key: Option<&str>) -> Result<Self, UploadError> {
        let scope = parse_upload_token(token)?;
        Ok(Self {
            bucket: scope.bucket,
            key: key.map(str::to_string),
        })
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// One server-side multipart session.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_id: String,
    pub target: ObjectTarget,
    pub part_size: u64,
    /// Known for file and buffer sources, `None` for streams.
    pub total_size: Option<u64>,
}

/// A part the service acknowledged and whose checksum matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub checksum: String,
}

/// Callback fired after each verified part with its number and etag.
pub type PartNotify = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Optional settings carried into the completion call.
#[derive(Clone, Default)]
pub struct UploadExtra {
    pub fname: String,
    pub mime_type: String,
    /// User metadata; keys are prefixed before they are sent.
    pub metadata: HashMap<String, String>,
    pub custom_vars: HashMap<String, String>,
    pub notify: Option<PartNotify>,
}

impl UploadExtra {
    pub(crate) fn notify(&self, part_number: u32, etag: &str) {
        if let Some(cb) = &self.notify {
            cb(part_number, etag);
        }
    }

    /// Completion body for `parts`, sorted by part number.
    pub(crate) fn completion(&self, parts: &[CompletedPart]) -> CompleteMultipart {
        let mut body = CompleteMultipart {
            parts: parts
                .iter()
                .map(|p| Part {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
            fname: self.fname.clone(),
            mime_type: self.mime_type.clone(),
            metadata: self.metadata.clone(),
            custom_vars: self.custom_vars.clone(),
        };
        body.sort_parts();
        body
    }
}

impl std::fmt::Debug for UploadExtra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadExtra")
            .field("fname", &self.fname)
            .field("mime_type", &self.mime_type)
            .field("metadata", &self.metadata)
            .field("custom_vars", &self.custom_vars)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

/// Lifecycle of a multipart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    PartsInFlight,
    Completing,
    Done,
    Aborting,
    Aborted,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, PartsInFlight)
                | (PartsInFlight, Completing)
                | (PartsInFlight, Aborting)
                | (Completing, Done)
                | (Aborting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }
}

/// Tracks one session through its states, logging each step.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    upload_id: String,
    state: SessionState,
}

impl Lifecycle {
    pub(crate) fn new(upload_id: &str) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            state: SessionState::Init,
        }
    }

    pub(crate) fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid session transition {:?} -> {next:?}",
            self.state
        );
        debug!(upload_id = %self.upload_id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn valid_transitions() {
        use SessionState::*;
        assert!(Init.can_advance_to(PartsInFlight));
        assert!(PartsInFlight.can_advance_to(Completing));
        assert!(PartsInFlight.can_advance_to(Aborting));
        assert!(Completing.can_advance_to(Done));
        assert!(Aborting.can_advance_to(Aborted));

        assert!(!Init.can_advance_to(Completing));
        assert!(!Completing.can_advance_to(Aborting));
        assert!(!Done.can_advance_to(Init));
        assert!(Done.is_terminal() && Aborted.is_terminal());
        assert!(!PartsInFlight.is_terminal());
    }

    #[test]
    fn lifecycle_walks_happy_path() {
        let mut lc = Lifecycle::new("u1");
        lc.advance(SessionState::PartsInFlight);
        lc.advance(SessionState::Completing);
        lc.advance(SessionState::Done);
        assert_eq!(lc.state(), SessionState::Done);
    }

    #[test]
    fn completion_sorts_and_keeps_extras() {
        let mut extra = UploadExtra {
            mime_type: "video/mp4".into(),
            ..Default::default()
        };
        extra.metadata.insert("owner".into(), "ops".into());
        let parts: Vec<CompletedPart> = [3u32, 1, 2]
            .iter()
            .map(|&n| CompletedPart {
                part_number: n,
                size: 1,
                etag: format!("e{n}"),
                checksum: String::new(),
            })
            .collect();

        let body = extra.completion(&parts);
        let numbers: Vec<u32> = body.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(body.parts[0].etag, "e1");
        assert_eq!(body.mime_type, "video/mp4");
        assert_eq!(body.metadata.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn notify_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let extra = UploadExtra {
            notify: Some(Arc::new(move |n: u32, etag: &str| {
                sink.lock().unwrap().push((n, etag.to_string()))
            })),
            ..Default::default()
        };
        extra.notify(2, "etag-2");
        assert_eq!(*seen.lock().unwrap(), vec![(2, "etag-2".to_string())]);
    }

    #[test]
    fn target_from_token() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE;

        let token = format!("ak:sig:{}", URL_SAFE.encode(r#"{"scope":"photos:cat.jpg"}"#));
        let target = ObjectTarget::from_token(&token, Some("dog.jpg")).unwrap();
        assert_eq!(target.bucket, "photos");
        assert_eq!(target.key(), Some("dog.jpg"));

        let keyless = ObjectTarget::from_token(&token, None).unwrap();
        assert_eq!(keyless.key(), None);

        assert!(matches!(
            ObjectTarget::from_token("garbage", None),
            Err(UploadError::InvalidToken(_))
        ));
    }
}
