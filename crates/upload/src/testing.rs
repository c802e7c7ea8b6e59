//! In-memory [`UploadApi`] for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use futures_util::StreamExt;
use partsync_protocol::{CompleteMultipart, UploadPartResponse};
use partsync_transfer::{PartBody, checksum_bytes};

use crate::api::{ApiFuture, UploadApi};
use crate::error::UploadError;
use crate::session::{ObjectTarget, UploadExtra, UploadSession};

/// Token scoped to `bucket`.
pub(crate) fn token_for(bucket: &str) -> String {
    let policy = format!(r#"{{"scope":"{bucket}","deadline":4102444800}}"#);
    format!("ak:sig:{}", URL_SAFE.encode(policy))
}

/// A scripted failure.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Status(u16),
    BadChecksum,
    Transport,
}

impl Reply {
    fn into_error(self, part_number: u32) -> UploadError {
        match self {
            Reply::Status(status) => UploadError::Status {
                status,
                message: format!("scripted {status}"),
            },
            Reply::BadChecksum => UploadError::ChecksumMismatch {
                part_number,
                expected: "sent".into(),
                actual: "garbled".into(),
            },
            Reply::Transport => UploadError::transport("connection reset"),
        }
    }
}

#[derive(Default)]
struct State {
    init_script: VecDeque<Reply>,
    part_scripts: HashMap<u32, VecDeque<Reply>>,
    complete_script: VecDeque<Reply>,
    delete_script: VecDeque<Reply>,
    put_script: VecDeque<Reply>,
    failing_hosts: HashSet<String>,

    init_calls: usize,
    part_attempts: HashMap<u32, usize>,
    host_hits: HashMap<String, usize>,
    uploaded: HashMap<u32, Vec<u8>>,
    completions: Vec<CompleteMultipart>,
    delete_calls: usize,
    put_bodies: Vec<Vec<u8>>,
}

/// Fake service. Every call succeeds unless a failure was scripted for it.
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<State>,
    part_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeApi {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn script_init(&self, reply: Reply) {
        self.with(|s| s.init_script.push_back(reply));
    }

    pub(crate) fn script_part(&self, part_number: u32, reply: Reply) {
        self.with(|s| {
            s.part_scripts
                .entry(part_number)
                .or_default()
                .push_back(reply)
        });
    }

    pub(crate) fn script_complete(&self, reply: Reply) {
        self.with(|s| s.complete_script.push_back(reply));
    }

    pub(crate) fn script_delete(&self, reply: Reply) {
        self.with(|s| s.delete_script.push_back(reply));
    }

    pub(crate) fn script_put(&self, reply: Reply) {
        self.with(|s| s.put_script.push_back(reply));
    }

    /// Every call against `host` fails with a transport error.
    pub(crate) fn fail_host(&self, host: &str) {
        self.with(|s| s.failing_hosts.insert(host.to_string()));
    }

    /// Each part upload sleeps this long before answering.
    pub(crate) fn set_part_delay(&self, delay: Duration) {
        *self.part_delay.lock().unwrap() = delay;
    }

    pub(crate) fn init_calls(&self) -> usize {
        self.with(|s| s.init_calls)
    }

    pub(crate) fn part_attempts(&self, part_number: u32) -> usize {
        self.with(|s| s.part_attempts.get(&part_number).copied().unwrap_or(0))
    }

    pub(crate) fn host_hits(&self, host: &str) -> usize {
        self.with(|s| s.host_hits.get(host).copied().unwrap_or(0))
    }

    /// Bytes of the accepted upload of `part_number`.
    pub(crate) fn uploaded(&self, part_number: u32) -> Option<Vec<u8>> {
        self.with(|s| s.uploaded.get(&part_number).cloned())
    }

    /// Completion bodies as received, metadata already prefixed.
    pub(crate) fn completions(&self) -> Vec<CompleteMultipart> {
        self.with(|s| s.completions.clone())
    }

    pub(crate) fn complete_calls(&self) -> usize {
        self.with(|s| s.completions.len())
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.with(|s| s.delete_calls)
    }

    pub(crate) fn put_calls(&self) -> usize {
        self.with(|s| s.put_bodies.len())
    }

    pub(crate) fn put_bodies(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.put_bodies.clone())
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn hit(&self, host: &str) -> bool {
        self.with(|s| {
            *s.host_hits.entry(host.to_string()).or_default() += 1;
            s.failing_hosts.contains(host)
        })
    }
}

async fn read_body(body: &PartBody) -> Result<Vec<u8>, UploadError> {
    let mut stream = body.open().await?;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

impl UploadApi for FakeApi {
    fn init_parts<'a>(
        &'a self,
        host: &'a str,
        _token: &'a str,
        _target: &'a ObjectTarget,
    ) -> ApiFuture<'a, String> {
        Box::pin(async move {
            let failing = self.hit(host);
            let (n, scripted) = self.with(|s| {
                s.init_calls += 1;
                (s.init_calls, s.init_script.pop_front())
            });
            if failing {
                return Err(UploadError::transport("connection refused"));
            }
            match scripted {
                Some(reply) => Err(reply.into_error(0)),
                None => Ok(format!("upload-{n}")),
            }
        })
    }

    fn upload_part<'a>(
        &'a self,
        host: &'a str,
        _token: &'a str,
        _session: &'a UploadSession,
        part_number: u32,
        body: PartBody,
    ) -> ApiFuture<'a, UploadPartResponse> {
        Box::pin(async move {
            let failing = self.hit(host);
            let scripted = self.with(|s| {
                *s.part_attempts.entry(part_number).or_default() += 1;
                s.part_scripts
                    .get_mut(&part_number)
                    .and_then(VecDeque::pop_front)
            });

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = *self.part_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let data = read_body(&body).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if failing {
                return Err(UploadError::transport("connection refused"));
            }
            if let Some(reply) = scripted {
                return Err(reply.into_error(part_number));
            }
            let data = data?;
            let md5 = checksum_bytes(&data);
            self.with(|s| s.uploaded.insert(part_number, data));
            Ok(UploadPartResponse {
                etag: format!("etag-{part_number}"),
                md5,
            })
        })
    }

    fn complete_parts<'a>(
        &'a self,
        host: &'a str,
        _token: &'a str,
        _session: &'a UploadSession,
        body: &'a CompleteMultipart,
    ) -> ApiFuture<'a, serde_json::Value> {
        Box::pin(async move {
            let failing = self.hit(host);
            let scripted = self.with(|s| {
                s.completions.push(body.clone());
                s.complete_script.pop_front()
            });
            if failing {
                return Err(UploadError::transport("connection refused"));
            }
            match scripted {
                Some(reply) => Err(reply.into_error(0)),
                None => Ok(serde_json::json!({ "hash": "fake-hash", "key": "fake-key" })),
            }
        })
    }

    fn delete_parts<'a>(
        &'a self,
        host: &'a str,
        _token: &'a str,
        _session: &'a UploadSession,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let failing = self.hit(host);
            let scripted = self.with(|s| {
                s.delete_calls += 1;
                s.delete_script.pop_front()
            });
            if failing {
                return Err(UploadError::transport("connection refused"));
            }
            match scripted {
                Some(reply) => Err(reply.into_error(0)),
                None => Ok(()),
            }
        })
    }

    fn put<'a>(
        &'a self,
        host: &'a str,
        _token: &'a str,
        _target: &'a ObjectTarget,
        body: PartBody,
        _extra: &'a UploadExtra,
    ) -> ApiFuture<'a, serde_json::Value> {
        Box::pin(async move {
            let failing = self.hit(host);
            let data = read_body(&body).await?;
            let scripted = self.with(|s| {
                s.put_bodies.push(data);
                s.put_script.pop_front()
            });
            if failing {
                return Err(UploadError::transport("connection refused"));
            }
            match scripted {
                Some(reply) => Err(reply.into_error(0)),
                None => Ok(serde_json::json!({ "hash": "put-hash", "key": "put-key" })),
            }
        })
    }
}
