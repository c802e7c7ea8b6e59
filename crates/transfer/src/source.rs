use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, stream};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::TransferError;
use crate::plan::PartSpec;

/// Streamed request body.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// A source whose length is known up front.
#[derive(Debug, Clone)]
pub enum DataSource {
    File { path: PathBuf, size: u64 },
    Memory(Bytes),
}

impl DataSource {
    /// Describes a file on disk. The size is read once, here.
    pub async fn file(path: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let path = path.into();
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(Self::File { path, size })
    }

    pub fn memory(data: impl Into<Bytes>) -> Self {
        Self::Memory(data.into())
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::File { size, .. } => *size,
            Self::Memory(data) => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Body for one planned part.
    pub fn part(&self, spec: &PartSpec) -> PartBody {
        match self {
            Self::File { path, .. } => PartBody::File {
                path: path.clone(),
                offset: spec.offset,
                size: spec.size,
            },
            Self::Memory(data) => {
                let start = spec.offset as usize;
                let end = (spec.offset + spec.size) as usize;
                PartBody::Memory(data.slice(start..end))
            }
        }
    }

    /// Body covering the whole source.
    pub fn whole(&self) -> PartBody {
        self.part(&PartSpec {
            number: 1,
            offset: 0,
            size: self.len(),
        })
    }
}

/// Bytes of a single request body.
///
/// File bodies are opened lazily so every retry reads the range afresh.
#[derive(Debug, Clone)]
pub enum PartBody {
    Memory(Bytes),
    File {
        path: PathBuf,
        offset: u64,
        size: u64,
    },
}

impl PartBody {
    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(data) => data.len() as u64,
            Self::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens the body as a byte stream.
    pub async fn open(&self) -> io::Result<BodyStream> {
        match self {
            Self::Memory(data) => {
                let data = data.clone();
                Ok(Box::pin(stream::iter(std::iter::once(Ok::<_, io::Error>(data)))))
            }
            Self::File { path, offset, size } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(*offset)).await?;
                Ok(Box::pin(ReaderStream::new(file.take(*size))))
            }
        }
    }
}
