//! Upload sizing: single-shot versus chunked session uploads.
//!
//! Chunks are produced in strictly increasing, contiguous offset order and
//! must be sent one after another; providers reject gaps in a session.

use std::io::SeekFrom;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::errors::Result;

/// Readable, seekable upload body.
pub trait UploadSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> UploadSource for T {}

/// Size threshold above which a provider needs a session upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Files of at most this many bytes go up in one request.
    pub threshold: u64,
    pub chunk_size: u64,
}

impl UploadLimits {
    pub const fn new(threshold: u64, chunk_size: u64) -> Self {
        Self {
            threshold,
            chunk_size,
        }
    }

    pub fn is_chunked(&self, size: u64) -> bool {
        size > self.threshold
    }

    /// Chunk layout for a file of `size` bytes.
    pub fn plan(&self, size: u64) -> ChunkPlan {
        ChunkPlan {
            size,
            chunk_size: self.chunk_size.max(1),
            next: 0,
            done: false,
        }
    }
}

/// One contiguous byte range of a session upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub len: u64,
    /// The request for this chunk also commits the upload.
    pub last: bool,
}

impl Chunk {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Iterator over the chunks covering `0..size`.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
    next: u64,
    done: bool,
}

impl ChunkPlan {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let offset = self.next;
        let len = self.chunk_size.min(self.size - offset);
        self.next = offset + len;
        let last = self.next >= self.size;
        self.done = last;
        Some(Chunk { offset, len, last })
    }
}

/// Total length of `source`; leaves the read position at the start.
pub async fn source_len(source: &mut dyn UploadSource) -> Result<u64> {
    let len = source.seek(SeekFrom::End(0)).await?;
    source.seek(SeekFrom::Start(0)).await?;
    Ok(len)
}

/// Read exactly `len` bytes from the current position.
pub async fn read_chunk(source: &mut dyn UploadSource, len: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    source.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read everything from the current position.
pub async fn read_all(source: &mut dyn UploadSource) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    source.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_threshold_boundary() {
        let limits = UploadLimits::new(100, 30);
        assert!(!limits.is_chunked(100));
        assert!(limits.is_chunked(101));
    }

    #[test]
    fn test_plan_layout() {
        let chunks: Vec<_> = UploadLimits::new(10, 4).plan(10).collect();
        assert_eq!(
            chunks,
            vec![
                Chunk { offset: 0, len: 4, last: false },
                Chunk { offset: 4, len: 4, last: false },
                Chunk { offset: 8, len: 2, last: true },
            ]
        );
    }

    #[test]
    fn test_plan_exact_multiple() {
        let chunks: Vec<_> = UploadLimits::new(0, 5).plan(10).collect();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].last);
        assert_eq!(chunks[1].end(), 10);
    }

    #[tokio::test]
    async fn test_source_len_rewinds() {
        let mut src = Cursor::new(vec![7u8; 12]);
        assert_eq!(source_len(&mut src).await.unwrap(), 12);
        let first = read_chunk(&mut src, 5).await.unwrap();
        assert_eq!(first.len(), 5);
        let rest = read_all(&mut src).await.unwrap();
        assert_eq!(rest.len(), 7);
    }

    proptest! {
        #[test]
        fn chunks_are_contiguous_and_cover_the_file(size in 1u64..50_000, chunk in 1u64..4_096) {
            let chunks: Vec<_> = UploadLimits::new(0, chunk).plan(size).collect();
            let mut expected_offset = 0;
            for c in &chunks {
                prop_assert_eq!(c.offset, expected_offset);
                prop_assert!(c.len > 0 && c.len <= chunk);
                expected_offset = c.end();
            }
            prop_assert_eq!(expected_offset, size);
            prop_assert!(chunks.last().unwrap().last);
            prop_assert_eq!(chunks.iter().filter(|c| c.last).count(), 1);
        }
    }
}
