//! Splitting sources into parts and checksumming them.
//!
//! Nothing in this crate talks to the network. The upload engines use
//! [`plan_parts`] to lay out a known-size source, [`DataSource`] to open a
//! fresh body for every attempt, [`ChunkReader`] to cut an unbounded reader
//! into parts, and [`Checksummed`] to hash a body while it is being sent.

mod checksum;
mod chunked;
mod plan;
mod source;

pub use checksum::{ChecksumHandle, Checksummed, checksum_bytes};
pub use chunked::{Chunk, ChunkReader, read_full};
pub use plan::{PartSpec, plan_custom_parts, plan_parts};
pub use source::{BodyStream, DataSource, PartBody};

/// Default part size: 4 MiB.
pub const DEFAULT_PART_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source is empty")]
    EmptySource,

    #[error("part size must be greater than zero")]
    ZeroPartSize,

    #[error("part sizes add up to {actual} bytes, source has {expected}")]
    PartLayout { expected: u64, actual: u64 },
}
