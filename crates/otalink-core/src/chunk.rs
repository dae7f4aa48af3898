//! Splitting firmware images into bounded frames.
//!
//! A `ChunkStreamer` walks a byte buffer front to back and yields slices of
//! at most `chunk_size` bytes. Only the final slice may be shorter. The
//! sequence is lazy and can only be restarted by building a new streamer.

/// Lazy, ordered frame sequence over a byte buffer.
#[derive(Debug, Clone)]
pub struct ChunkStreamer<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
}

impl<'a> ChunkStreamer<'a> {
    /// Create a streamer over `data`.
    ///
    /// A `chunk_size` of zero is treated as one byte per frame.
    pub fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }

    /// Frame size limit in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total number of bytes in the buffer.
    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    /// Total number of frames the buffer splits into.
    pub fn total_chunks(&self) -> usize {
        self.data.len().div_ceil(self.chunk_size)
    }

    /// Bytes already yielded.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for ChunkStreamer<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = &self.data[self.offset..end];
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkStreamer<'_> {}
