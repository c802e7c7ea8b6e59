use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use md5::{Digest, Md5};

/// Computes MD5 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Read side of a [`Checksummed`] stream.
///
/// Holds the digest of every chunk the stream has yielded so far.
#[derive(Clone, Default)]
pub struct ChecksumHandle {
    hasher: Arc<Mutex<Md5>>,
}

impl ChecksumHandle {
    fn update(&self, data: &[u8]) {
        self.hasher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(data);
    }

    /// Hex digest of the bytes seen so far.
    pub fn hex(&self) -> String {
        let hasher = self
            .hasher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        hex::encode(hasher.finalize())
    }
}

/// Stream adapter that hashes every chunk as it passes through.
pub struct Checksummed<S> {
    inner: S,
    handle: ChecksumHandle,
}

impl<S> Checksummed<S> {
    pub fn new(inner: S) -> (Self, ChecksumHandle) {
        let handle = ChecksumHandle::default();
        (
            Self {
                inner,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl<S> Stream for Checksummed<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.handle.update(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
