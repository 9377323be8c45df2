//! Reassembles chunked messages from an async byte stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::BoltError;

/// Reads Bolt-chunked messages from an `AsyncRead` stream.
///
/// A message is a run of chunks (u16 big-endian length, then data) closed
/// by a zero-length chunk. A message with no data chunks at all is a NOOP
/// keep-alive and is skipped.
pub struct ChunkReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next non-empty message.
    pub async fn read_message(&mut self) -> Result<BytesMut, BoltError> {
        loop {
            let message = self.read_raw().await?;
            if !message.is_empty() {
                return Ok(message);
            }
            tracing::trace!("skipping NOOP chunk");
        }
    }

    async fn read_raw(&mut self) -> Result<BytesMut, BoltError> {
        let mut message = BytesMut::new();
        loop {
            let chunk_len = usize::from(self.reader.read_u16().await?);
            if chunk_len == 0 {
                return Ok(message);
            }
            let start = message.len();
            message.resize(start + chunk_len, 0);
            self.reader.read_exact(&mut message[start..]).await?;
        }
    }
}
