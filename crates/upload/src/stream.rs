use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use partsync_hosts::{HostHealthTracker, HostSelector};
use partsync_transfer::{Chunk, ChunkReader, PartBody};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::UploadApi;
use crate::engine::{Engine, UploadConfig, keep_primary};
use crate::error::UploadError;
use crate::session::{
    CompletedPart, Lifecycle, ObjectTarget, SessionState, UploadExtra, UploadSession,
};

/// Uploads readers of unknown length through a bounded queue and a fixed
/// pool of part workers.
#[derive(Debug, Clone)]
pub struct StreamUploader {
    engine: Arc<Engine>,
}

type Completed = Arc<Mutex<Vec<CompletedPart>>>;

impl StreamUploader {
    pub fn new(
        api: Arc<dyn UploadApi>,
        hosts: Vec<String>,
        tracker: Arc<HostHealthTracker>,
        config: UploadConfig,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(api, hosts, tracker, config)),
        }
    }

    /// Shares `selector`'s host cursor with other uploaders.
    pub fn with_selector(
        api: Arc<dyn UploadApi>,
        hosts: Vec<String>,
        selector: Arc<HostSelector>,
        config: UploadConfig,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::with_selector(api, hosts, selector, config)),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.engine.config
    }

    /// Reads `reader` to the end and uploads it.
    ///
    /// Input that fits in a single part is sent with one single-shot put
    /// and never opens a session.
    pub async fn upload<R>(
        &self,
        token: &str,
        key: Option<&str>,
        reader: R,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let target = ObjectTarget::from_token(token, key)?;
        let part_size = usize::try_from(self.engine.config.part_size).unwrap_or(usize::MAX);
        let mut chunks = ChunkReader::new(reader, part_size);

        let first = match chunks.next_chunk().await? {
            Some(chunk) if chunk.data.len() == chunks.part_size() => chunk,
            short => {
                let data = short.map(|c| c.data).unwrap_or_default();
                return self.put_small(token, &target, data, extra, cancel).await;
            }
        };
        let Some(second) = chunks.next_chunk().await? else {
            return self.put_small(token, &target, first.data, extra, cancel).await;
        };

        let upload_id = self.engine.init(token, &target, cancel).await?;
        let session = Arc::new(UploadSession {
            upload_id,
            target,
            part_size: self.engine.config.part_size,
            total_size: None,
        });
        let mut lifecycle = Lifecycle::new(&session.upload_id);
        lifecycle.advance(SessionState::PartsInFlight);
        info!(upload_id = %session.upload_id, "streaming parts");

        let result = self
            .pump(token, &session, chunks, [first, second], extra, cancel)
            .await;
        self.engine
            .conclude(token, &session, &mut lifecycle, result, extra, cancel)
            .await
    }

    async fn put_small(
        &self,
        token: &str,
        target: &ObjectTarget,
        data: bytes::Bytes,
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        debug!(size = data.len(), "stream fits in one part, using single-shot put");
        self.engine
            .put(token, target, PartBody::Memory(data), extra, cancel)
            .await
    }

    /// Feeds chunks to the workers until the reader ends or something fails.
    async fn pump<R>(
        &self,
        token: &str,
        session: &Arc<UploadSession>,
        chunks: ChunkReader<R>,
        head: [Chunk; 2],
        extra: &UploadExtra,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let workers = self.engine.concurrency();
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel::<Chunk>(workers);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let completed: Completed = Arc::new(Mutex::new(Vec::new()));
        let token: Arc<str> = Arc::from(token);
        let extra = Arc::new(extra.clone());

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            pool.spawn(worker(
                self.engine.clone(),
                token.clone(),
                session.clone(),
                rx.clone(),
                completed.clone(),
                extra.clone(),
                cancel.clone(),
            ));
        }

        let produced = produce(tx, chunks, head, &cancel).await;

        let mut primary = None;
        if let Err(e) = produced {
            cancel.cancel();
            primary = Some(e);
        }
        while let Some(joined) = pool.join_next().await {
            let res = joined.unwrap_or_else(|e| Err(UploadError::Io(io::Error::other(e))));
            if let Err(e) = res {
                cancel.cancel();
                primary = Some(keep_primary(primary, e));
            }
        }
        if let Some(e) = primary {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let parts = std::mem::take(&mut *completed.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(parts)
    }
}

async fn produce<R>(
    tx: mpsc::Sender<Chunk>,
    mut chunks: ChunkReader<R>,
    head: [Chunk; 2],
    cancel: &CancellationToken,
) -> Result<(), UploadError>
where
    R: AsyncRead + Unpin + Send,
{
    for chunk in head {
        send(&tx, chunk, cancel).await?;
    }
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            next = chunks.next_chunk() => next?,
        };
        match next {
            Some(chunk) => send(&tx, chunk, cancel).await?,
            None => return Ok(()),
        }
    }
}

async fn send(
    tx: &mpsc::Sender<Chunk>,
    chunk: Chunk,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        sent = tx.send(chunk) => sent.map_err(|_| UploadError::Cancelled),
    }
}

async fn worker(
    engine: Arc<Engine>,
    token: Arc<str>,
    session: Arc<UploadSession>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Chunk>>>,
    completed: Completed,
    extra: Arc<UploadExtra>,
    cancel: CancellationToken,
) -> Result<(), UploadError> {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                chunk = rx.recv() => chunk,
            }
        };
        let Some(chunk) = next else {
            return Ok(());
        };

        let size = chunk.data.len() as u64;
        let number = chunk.part_number;
        match engine
            .upload_part(&token, &session, number, PartBody::Memory(chunk.data), &cancel)
            .await
        {
            Ok(resp) => {
                extra.notify(number, &resp.etag);
                completed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(CompletedPart {
                        part_number: number,
                        size,
                        etag: resp.etag,
                        checksum: resp.md5,
                    });
            }
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        }
    }
}
