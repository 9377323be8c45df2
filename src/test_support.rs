//! Scripted in-memory Bolt servers for tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use crate::chunk::{ChunkReader, ChunkWriter};
use crate::connection::{BoxedStream, Transport};
use crate::driver::BoltAddress;
use crate::error::BoltError;
use crate::message::{decode_client_message, encode_server_message, ClientMessage, ServerMessage};
use crate::types::{BoltDict, BoltValue};
use crate::version::{ProtocolTable, ProtocolVersion, BOLT_MAGIC};

type Script = Arc<dyn Fn(DuplexStream) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Transport whose "servers" are scripts running on in-memory streams.
/// Connecting to an address without a script fails like a refused TCP
/// connect.
#[derive(Default)]
pub struct StubTransport {
    scripts: Mutex<HashMap<BoltAddress, Script>>,
    connects: Mutex<HashMap<BoltAddress, usize>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `script` on the server end of every new connection to `address`.
    pub fn script<F, Fut>(&self, address: &str, script: F)
    where
        F: Fn(DuplexStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Script = Arc::new(move |io| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(script(io))
        });
        self.scripts.lock().insert(addr(address), boxed);
    }

    /// Serves every connection to `address` at `version`, answering each
    /// client message with `respond`.
    pub fn serve<F>(&self, address: &str, version: (u8, u8), respond: F)
    where
        F: Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync + 'static,
    {
        let respond = Arc::new(respond);
        self.script(address, move |io| {
            let respond = Arc::clone(&respond);
            async move {
                let table = ProtocolTable::only(version.0, version.1).expect("supported version");
                if let Ok(server) = StubServer::handshake(io, &table).await {
                    server.serve(|msg| respond(msg)).await;
                }
            }
        });
    }

    /// Makes `address` refuse new connections.
    pub fn take_down(&self, address: &str) {
        self.scripts.lock().remove(&addr(address));
    }

    pub fn connects(&self, address: &str) -> usize {
        self.connects.lock().get(&addr(address)).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn connect(&self, address: &BoltAddress) -> Result<BoxedStream, BoltError> {
        let script = self.scripts.lock().get(address).cloned();
        let Some(script) = script else {
            return Err(BoltError::Connectivity(format!("connection refused: {address}")));
        };
        *self.connects.lock().entry(address.clone()).or_default() += 1;
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(script(server));
        Ok(Box::new(client))
    }
}

fn addr(address: &str) -> BoltAddress {
    BoltAddress::parse(address).expect("valid test address")
}

/// Server end of one connection.
pub struct StubServer {
    reader: ChunkReader<ReadHalf<DuplexStream>>,
    writer: ChunkWriter<WriteHalf<DuplexStream>>,
    pub version: ProtocolVersion,
}

impl StubServer {
    /// Answers the client's handshake with the best version in `table`.
    pub async fn handshake(mut io: DuplexStream, table: &ProtocolTable) -> Result<Self, BoltError> {
        let mut preamble = [0u8; 20];
        io.read_exact(&mut preamble).await?;
        if preamble[..4] != BOLT_MAGIC {
            return Err(BoltError::Protocol("bad magic".into()));
        }
        let mut proposals = [0u8; 16];
        proposals.copy_from_slice(&preamble[4..]);

        let Some(version) = table.negotiate(&proposals) else {
            io.write_all(&[0, 0, 0, 0]).await?;
            return Err(BoltError::Protocol("no common version".into()));
        };
        io.write_all(&version.to_reply()).await?;

        let (rh, wh) = tokio::io::split(io);
        Ok(Self {
            reader: ChunkReader::new(rh),
            writer: ChunkWriter::new(wh),
            version,
        })
    }

    /// Next client message, or `None` once the client has gone.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        let bytes = self.reader.read_message().await.ok()?;
        Some(decode_client_message(&bytes).expect("client sent a malformed message"))
    }

    pub async fn send(&mut self, messages: impl IntoIterator<Item = ServerMessage>) {
        for msg in messages {
            let mut buf = BytesMut::new();
            encode_server_message(&mut buf, &msg);
            self.writer.write_message(&buf);
        }
        let _ = self.writer.flush().await;
    }

    /// Answers messages until the client disconnects.
    pub async fn serve(mut self, mut respond: impl FnMut(&ClientMessage) -> Vec<ServerMessage>) {
        while let Some(msg) = self.recv().await {
            let replies = respond(&msg);
            self.send(replies).await;
        }
    }
}

pub fn success<'a>(entries: impl IntoIterator<Item = (&'a str, BoltValue)>) -> ServerMessage {
    ServerMessage::Success {
        metadata: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    }
}

pub fn record(fields: Vec<BoltValue>) -> ServerMessage {
    ServerMessage::Record { data: fields }
}

pub fn failure(code: &str, message: &str) -> ServerMessage {
    ServerMessage::Failure {
        metadata: BoltDict::from([
            ("code".to_string(), BoltValue::from(code)),
            ("message".to_string(), BoltValue::from(message)),
        ]),
    }
}

/// A well-behaved server: SUCCESS for everything, no records, no reply to
/// GOODBYE.
pub fn default_reply(msg: &ClientMessage) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Goodbye => vec![],
        ClientMessage::Run { .. } => vec![success([("fields", BoltValue::List(vec![]))])],
        _ => vec![success([])],
    }
}

/// Replies for a RUN + PULL returning `rows` under `keys`, then `summary`.
pub fn rows(keys: &[&str], rows: Vec<Vec<BoltValue>>, summary: BoltDict) -> (ServerMessage, Vec<ServerMessage>) {
    let fields = keys.iter().map(|k| BoltValue::from(*k)).collect::<Vec<_>>();
    let run = success([("fields", BoltValue::List(fields))]);
    let mut pull: Vec<_> = rows.into_iter().map(record).collect();
    pull.push(ServerMessage::Success { metadata: summary });
    (run, pull)
}

/// `[ttl, servers]`: the record a routing procedure returns.
pub fn routing_record(ttl: i64, routers: &[&str], readers: &[&str], writers: &[&str]) -> Vec<BoltValue> {
    let entry = |role: &str, addresses: &[&str]| {
        BoltValue::Dict(BoltDict::from([
            ("role".to_string(), BoltValue::from(role)),
            (
                "addresses".to_string(),
                BoltValue::List(addresses.iter().map(|a| BoltValue::from(*a)).collect()),
            ),
        ]))
    };
    vec![
        BoltValue::Integer(ttl),
        BoltValue::List(vec![
            entry("ROUTE", routers),
            entry("READ", readers),
            entry("WRITE", writers),
        ]),
    ]
}

/// A router answering every discovery call with `record`.
pub fn router(record: Vec<BoltValue>) -> impl Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync + 'static {
    move |msg| match msg {
        ClientMessage::Run { .. } => vec![success([(
            "fields",
            BoltValue::List(vec![BoltValue::from("ttl"), BoltValue::from("servers")]),
        )])],
        ClientMessage::Pull { .. } | ClientMessage::PullAll => {
            vec![self::record(record.clone()), success([])]
        }
        other => default_reply(other),
    }
}
