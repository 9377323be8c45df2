//! Byte-stream transports that a connection runs over.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::driver::BoltAddress;
use crate::error::BoltError;

/// Any bidirectional async stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens raw streams to servers. TLS or in-memory test transports plug in
/// here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &BoltAddress) -> Result<BoxedStream, BoltError>;
}

/// Plain TCP with `TCP_NODELAY`: requests are small and latency-bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &BoltAddress) -> Result<BoxedStream, BoltError> {
        let stream = TcpStream::connect((address.host(), address.port()))
            .await
            .map_err(|e| BoltError::Connectivity(format!("unable to connect to {address}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
