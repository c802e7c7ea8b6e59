use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One fixed-size piece of an unbounded source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub part_number: u32,
    pub data: Bytes,
}

/// Reads up to `size` bytes, stopping early only at end of input.
pub async fn read_full<R>(reader: &mut R, size: usize) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

/// Cuts a reader into `part_size` chunks numbered from 1.
///
/// The first short read ends the sequence.
pub struct ChunkReader<R> {
    reader: R,
    part_size: usize,
    next_part: u32,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, part_size: usize) -> Self {
        Self {
            reader,
            part_size: part_size.max(1),
            next_part: 1,
            done: false,
        }
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Reads the next chunk. Returns `None` once the source is exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let data = read_full(&mut self.reader, self.part_size).await?;
        if data.len() < self.part_size {
            self.done = true;
        }
        if data.is_empty() {
            return Ok(None);
        }
        let chunk = Chunk {
            part_number: self.next_part,
            data,
        };
        self.next_part += 1;
        Ok(Some(chunk))
    }
}
