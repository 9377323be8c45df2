//! One physical Bolt connection.
//!
//! A connection owns the write half of its stream and a tokio task that
//! owns the read half. The reader task decodes every incoming message and
//! hands it to the [`ResponseDispatcher`], so replies are correlated on a
//! single execution context while callers wait on channels.

mod dispatcher;
pub mod handshake;
pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use dispatcher::{Outcome, ResponseDispatcher};
pub use transport::{AsyncStream, BoxedStream, TcpTransport, Transport};

use crate::chunk::{ChunkReader, ChunkWriter};
use crate::driver::BoltAddress;
use crate::error::BoltError;
use crate::message::{decode_server_message, encode_client_message, ClientMessage};
use crate::protocol::handlers::ResponseHandler;
use crate::protocol::BoltProtocol;
use crate::types::{BoltDict, BoltValue};
use crate::version::{ProtocolTable, ProtocolVersion};

/// Told about failures that say something about the server behind an
/// address. The routing layer uses this to drop servers from its table.
pub trait FailureListener: Send + Sync {
    /// The server could not be reached or the connection died mid-request.
    fn on_connection_failure(&self, address: &BoltAddress);

    /// The server refused work because it is no longer in the role it was
    /// chosen for (e.g. no longer the leader).
    fn on_write_failure(&self, address: &BoltAddress);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    InUse,
    Broken,
    Closed,
}

/// State shared between the connection handle and its reader task.
struct Shared {
    address: BoltAddress,
    dispatcher: Mutex<ResponseDispatcher>,
    listener: Option<Arc<dyn FailureListener>>,
}

impl Shared {
    fn report(&self, outcome: &Outcome) {
        let Some(listener) = &self.listener else {
            return;
        };
        match outcome {
            Outcome::Failed { role_change: true } => listener.on_write_failure(&self.address),
            Outcome::Broken => listener.on_connection_failure(&self.address),
            _ => {}
        }
    }

    fn fail(&self, error: BoltError) {
        let had_pending = {
            let mut dispatcher = self.dispatcher.lock();
            let had_pending = dispatcher.pending() > 0;
            dispatcher.fail_all(error);
            had_pending
        };
        // An idle connection closed by the server says nothing about the
        // server's health.
        if had_pending {
            self.report(&Outcome::Broken);
        }
    }
}

pub struct Connection {
    id: Uuid,
    version: ProtocolVersion,
    protocol: BoltProtocol,
    server_agent: Option<String>,
    writer: ChunkWriter<WriteHalf<BoxedStream>>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    state: ConnectionState,
    last_used: Instant,
}

impl Connection {
    /// Performs the handshake on `stream` and starts the reader task. The
    /// connection still has to be initialized (INIT/HELLO).
    pub async fn establish(
        mut stream: BoxedStream,
        address: BoltAddress,
        protocols: &ProtocolTable,
        listener: Option<Arc<dyn FailureListener>>,
    ) -> Result<Self, BoltError> {
        let version = handshake::client_handshake(&mut stream, protocols).await?;
        let protocol = BoltProtocol::for_version(version)?;

        let (rh, wh) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            address,
            dispatcher: Mutex::new(ResponseDispatcher::new()),
            listener,
        });
        let reader = tokio::spawn(read_loop(ChunkReader::new(rh), Arc::clone(&shared)));

        Ok(Self {
            id: Uuid::new_v4(),
            version,
            protocol,
            server_agent: None,
            writer: ChunkWriter::new(wh),
            shared,
            reader,
            state: ConnectionState::Ready,
            last_used: Instant::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &BoltAddress {
        &self.shared.address
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn protocol(&self) -> BoltProtocol {
        self.protocol
    }

    /// The `server` string from the initialization SUCCESS.
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        match self.state {
            ConnectionState::Closed => ConnectionState::Closed,
            _ if self.is_broken() => ConnectionState::Broken,
            state => state,
        }
    }

    pub(crate) fn set_in_use(&mut self, in_use: bool) {
        if matches!(self.state, ConnectionState::Ready | ConnectionState::InUse) {
            self.state = if in_use {
                ConnectionState::InUse
            } else {
                ConnectionState::Ready
            };
        }
        self.last_used = Instant::now();
    }

    pub fn is_broken(&self) -> bool {
        self.shared.dispatcher.lock().is_broken()
    }

    /// Requests written whose reply has not completed yet.
    pub fn pending(&self) -> usize {
        self.shared.dispatcher.lock().pending()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Queues `msg` for sending and `handler` for its reply. Nothing goes
    /// out until [`flush`](Self::flush).
    pub fn write(&mut self, msg: &ClientMessage, handler: Box<dyn ResponseHandler>) -> Result<(), BoltError> {
        {
            let mut dispatcher = self.shared.dispatcher.lock();
            if let Some(reason) = dispatcher.broken_reason() {
                return Err(BoltError::Connectivity(format!(
                    "connection to {} is broken: {reason}",
                    self.shared.address
                )));
            }
            dispatcher.queue(handler, msg.streams_records());
        }
        let mut buf = BytesMut::new();
        encode_client_message(&mut buf, msg);
        self.writer.write_message(&buf);
        tracing::trace!(connection_id = %self.id, message = msg.name(), "queued");
        Ok(())
    }

    /// Sends everything queued. A write failure breaks the connection and
    /// fails every pending handler.
    pub async fn flush(&mut self) -> Result<(), BoltError> {
        self.last_used = Instant::now();
        if let Err(e) = self.writer.flush().await {
            let reason = format!("failed to write to {}: {e}", self.shared.address);
            self.shared.fail(BoltError::Connectivity(reason.clone()));
            return Err(BoltError::Connectivity(reason));
        }
        Ok(())
    }

    /// Marks the connection unusable; pending handlers fail with `reason`.
    pub fn mark_broken(&self, reason: &str) {
        self.shared
            .dispatcher
            .lock()
            .fail_all(BoltError::Connectivity(reason.to_string()));
    }

    /// Says GOODBYE when the protocol has it and the connection is healthy,
    /// then stops the reader. Errors are ignored: the connection is going
    /// away either way.
    pub async fn close(mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.protocol.supports_goodbye() && !self.is_broken() {
            let mut buf = BytesMut::new();
            encode_client_message(&mut buf, &ClientMessage::Goodbye);
            self.writer.write_message(&buf);
            if let Err(e) = self.writer.shutdown().await {
                tracing::debug!(connection_id = %self.id, error = %e, "GOODBYE failed");
            }
        }
        self.state = ConnectionState::Closed;
        self.reader.abort();
        tracing::debug!(address = %self.shared.address, connection_id = %self.id, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.shared.address)
            .field("version", &self.version)
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop(mut reader: ChunkReader<ReadHalf<BoxedStream>>, shared: Arc<Shared>) {
    loop {
        let decoded = match reader.read_message().await {
            Ok(bytes) => decode_server_message(&bytes),
            Err(BoltError::Io(e)) => Err(BoltError::Connectivity(format!(
                "connection to {} lost: {e}",
                shared.address
            ))),
            Err(e) => Err(e),
        };
        match decoded {
            Ok(msg) => {
                let outcome = shared.dispatcher.lock().dispatch(msg);
                shared.report(&outcome);
            }
            Err(error) => {
                tracing::debug!(address = %shared.address, error = %error, "connection reader stopped");
                shared.fail(error);
                return;
            }
        }
    }
}

/// Opens initialized connections: transport connect, handshake, then
/// INIT/HELLO(/LOGON), all under one timeout.
pub struct Connector {
    transport: Arc<dyn Transport>,
    protocols: ProtocolTable,
    user_agent: String,
    auth: BoltDict,
    routing_context: Option<BoltDict>,
    connection_timeout: Duration,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn Transport>,
        protocols: ProtocolTable,
        user_agent: impl Into<String>,
        auth: BoltDict,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            protocols,
            user_agent: user_agent.into(),
            auth,
            routing_context: None,
            connection_timeout,
        }
    }

    /// Sent in HELLO from Bolt 4.1 so the server knows routing is in use.
    pub fn with_routing_context(mut self, context: BoltDict) -> Self {
        self.routing_context = Some(context);
        self
    }

    pub async fn connect(
        &self,
        address: &BoltAddress,
        listener: Option<Arc<dyn FailureListener>>,
    ) -> Result<Connection, BoltError> {
        let ms = self.connection_timeout.as_millis();
        tokio::time::timeout(self.connection_timeout, self.establish(address, listener))
            .await
            .map_err(|_| BoltError::Connectivity(format!("Unable to establish connection in {ms}ms")))?
    }

    async fn establish(
        &self,
        address: &BoltAddress,
        listener: Option<Arc<dyn FailureListener>>,
    ) -> Result<Connection, BoltError> {
        tracing::debug!(%address, state = ?ConnectionState::Connecting, "opening connection");
        let stream = self.transport.connect(address).await?;
        let mut conn = Connection::establish(stream, address.clone(), &self.protocols, listener).await?;

        let protocol = conn.protocol();
        let metadata = protocol
            .initialize(&mut conn, &self.user_agent, &self.auth, self.routing_context.as_ref())
            .await?;
        conn.server_agent = metadata.get("server").and_then(BoltValue::as_str).map(str::to_owned);

        tracing::debug!(
            %address,
            connection_id = %conn.id,
            version = %conn.version,
            "connection established"
        );
        Ok(conn)
    }
}
