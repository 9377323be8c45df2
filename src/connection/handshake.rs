//! Client side of the Bolt handshake.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BoltError;
use crate::version::{ProtocolTable, ProtocolVersion, BOLT_MAGIC};

/// Sends the magic preamble and the table's proposals, then reads and
/// checks the version the server picked.
pub async fn client_handshake<S>(stream: &mut S, table: &ProtocolTable) -> Result<ProtocolVersion, BoltError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = [0u8; 20];
    hello[..4].copy_from_slice(&BOLT_MAGIC);
    hello[4..].copy_from_slice(&table.proposals());
    stream.write_all(&hello).await?;
    stream.flush().await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(|e| {
        BoltError::Connectivity(format!("connection closed during handshake: {e}"))
    })?;
    table.select(ProtocolVersion::from_reply(reply)?)
}
