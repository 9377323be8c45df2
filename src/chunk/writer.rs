//! Frames messages into chunks and writes them to an async byte stream.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::BoltError;

/// Largest payload a single chunk can carry (u16 length prefix).
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Buffers chunked messages until [`flush`](Self::flush), so a batch of
/// pipelined requests goes out in one socket write.
pub struct ChunkWriter<W> {
    writer: W,
    out: BytesMut,
    max_chunk_size: usize,
}

impl<W: AsyncWrite + Unpin> ChunkWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_chunk_size(writer, MAX_CHUNK_SIZE)
    }

    /// Uses a smaller chunk size; mostly useful to exercise chunk splitting.
    pub fn with_chunk_size(writer: W, max_chunk_size: usize) -> Self {
        Self {
            writer,
            out: BytesMut::with_capacity(8 * 1024),
            max_chunk_size: max_chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    /// Appends one message to the outgoing buffer. Nothing is sent yet.
    pub fn write_message(&mut self, data: &[u8]) {
        for chunk in data.chunks(self.max_chunk_size) {
            self.out.put_u16(chunk.len() as u16);
            self.out.put_slice(chunk);
        }
        self.out.put_u16(0);
    }

    /// Bytes buffered and not yet flushed.
    pub fn buffered(&self) -> usize {
        self.out.len()
    }

    /// Sends everything buffered and flushes the stream. The buffer is
    /// cleared even on failure: a partially written batch cannot be resent.
    pub async fn flush(&mut self) -> Result<(), BoltError> {
        let pending = self.out.split();
        if !pending.is_empty() {
            self.writer.write_all(&pending).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the write side.
    pub async fn shutdown(&mut self) -> Result<(), BoltError> {
        self.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
