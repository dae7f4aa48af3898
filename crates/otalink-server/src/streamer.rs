//! Ordered transmission of chunked payloads over a device link.

use std::time::Duration;

use otalink_core::ChunkStreamer;
use thiserror::Error;
use tracing::trace;

use crate::link::{DeviceLink, Frame, LinkError};

/// A chunk stream stopped before the last frame was accepted.
#[derive(Debug, Error)]
#[error("chunk stream aborted after {chunks_sent} chunks ({bytes_sent} bytes): {source}")]
pub struct StreamError {
    pub chunks_sent: usize,
    pub bytes_sent: usize,
    #[source]
    pub source: LinkError,
}

/// Send `data` over `link` as binary frames of at most `chunk_size` bytes.
///
/// Frames go out strictly in order and each one must be accepted by the
/// transport within `send_timeout` before the next is started. `on_chunk`
/// runs with the frame length after every accepted frame. The first failure
/// aborts the stream; nothing is retried.
///
/// Returns the number of frames sent.
pub async fn stream_chunks<F>(
    link: &DeviceLink,
    data: &[u8],
    chunk_size: usize,
    send_timeout: Duration,
    mut on_chunk: F,
) -> Result<usize, StreamError>
where
    F: FnMut(usize),
{
    let streamer = ChunkStreamer::new(data, chunk_size);
    let total = streamer.total_chunks();
    let mut chunks_sent = 0;
    let mut bytes_sent = 0;

    for chunk in streamer {
        if let Err(source) = link
            .send_timeout(Frame::Binary(chunk.to_vec()), send_timeout)
            .await
        {
            return Err(StreamError {
                chunks_sent,
                bytes_sent,
                source,
            });
        }
        chunks_sent += 1;
        bytes_sent += chunk.len();
        on_chunk(chunk.len());
        trace!("{}: chunk {}/{} ({} bytes)", link.id(), chunks_sent, total, chunk.len());
    }

    Ok(chunks_sent)
}
