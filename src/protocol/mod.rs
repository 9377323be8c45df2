//! Version-specific message sequences.
//!
//! [`BoltProtocol`] turns driver operations (initialize, run, begin, commit,
//! rollback) into the messages the negotiated Bolt version expects, queues
//! a handler for each, and decides when to flush.

pub mod handlers;

use tokio::sync::mpsc;

use self::handlers::{completed, Completion, CompletionHandler, NoOpHandler, StreamEvent, StreamHandler};
use crate::connection::Connection;
use crate::error::BoltError;
use crate::message::ClientMessage;
use crate::session::{AccessMode, Bookmark};
use crate::types::{BoltDict, BoltValue};
use crate::version::ProtocolVersion;

const GET_SERVERS: &str = "CALL dbms.cluster.routing.getServers";
const GET_ROUTING_TABLE: &str = "CALL dbms.cluster.routing.getRoutingTable($context)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoltProtocol {
    /// Bolt 1 and 2: INIT, transactions framed as RUN "BEGIN"/"COMMIT".
    V1,
    /// Bolt 3: HELLO and explicit transaction messages.
    V3,
    /// Bolt 4.x: PULL/DISCARD take a record count.
    V4 { minor: u8 },
    /// Bolt 5.x: from 5.1 credentials move to LOGON.
    V5 { minor: u8 },
}

/// The two replies a RUN + PULL pair produces: the RUN acknowledgement and
/// the record stream ending in the PULL's summary.
pub struct PendingResult {
    pub ack: Completion,
    pub records: mpsc::UnboundedReceiver<StreamEvent>,
}

impl PendingResult {
    /// Waits for everything: `(run metadata, records, summary metadata)`.
    pub async fn collect(mut self) -> Result<(BoltDict, Vec<Vec<BoltValue>>, BoltDict), BoltError> {
        let run = completed(self.ack).await?;
        let mut records = Vec::new();
        while let Some(event) = self.records.recv().await {
            match event {
                StreamEvent::Record(fields) => records.push(fields),
                StreamEvent::Done(summary) => return Ok((run, records, summary?)),
            }
        }
        Err(BoltError::Connectivity(
            "connection closed before the result was complete".into(),
        ))
    }
}

impl BoltProtocol {
    pub fn for_version(version: ProtocolVersion) -> Result<Self, BoltError> {
        match version.major {
            1 | 2 => Ok(Self::V1),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4 {
                minor: version.minor,
            }),
            5 => Ok(Self::V5 {
                minor: version.minor,
            }),
            _ => Err(BoltError::Protocol(format!("unsupported Bolt version {version}"))),
        }
    }

    pub fn supports_goodbye(self) -> bool {
        self != Self::V1
    }

    fn separate_logon(self) -> bool {
        matches!(self, Self::V5 { minor } if minor >= 1)
    }

    fn hello_carries_routing(self) -> bool {
        match self {
            Self::V1 | Self::V3 => false,
            Self::V4 { minor } => minor >= 1,
            Self::V5 { .. } => true,
        }
    }

    fn pull(self) -> ClientMessage {
        match self {
            Self::V1 | Self::V3 => ClientMessage::PullAll,
            _ => ClientMessage::pull_all(),
        }
    }

    /// Sends INIT/HELLO (and LOGON from 5.1) and waits for the server to
    /// accept. Returns the initialization metadata.
    pub async fn initialize(
        self,
        conn: &mut Connection,
        user_agent: &str,
        auth: &BoltDict,
        routing: Option<&BoltDict>,
    ) -> Result<BoltDict, BoltError> {
        if self == Self::V1 {
            let init = ClientMessage::Init {
                user_agent: user_agent.to_string(),
                auth: auth.clone(),
            };
            return request_all(conn, &[init]).await;
        }

        let mut extra = BoltDict::from([("user_agent".to_string(), BoltValue::from(user_agent))]);
        if let Some(context) = routing.filter(|_| self.hello_carries_routing()) {
            extra.insert("routing".to_string(), BoltValue::Dict(context.clone()));
        }

        if self.separate_logon() {
            let (hello, hello_rx) = CompletionHandler::new();
            conn.write(&ClientMessage::Hello { extra }, Box::new(hello))?;
            let (logon, logon_rx) = CompletionHandler::new();
            conn.write(&ClientMessage::Logon { auth: auth.clone() }, Box::new(logon))?;
            conn.flush().await?;
            let metadata = completed(hello_rx).await?;
            completed(logon_rx).await?;
            Ok(metadata)
        } else {
            extra.extend(auth.iter().map(|(k, v)| (k.clone(), v.clone())));
            request_all(conn, &[ClientMessage::Hello { extra }]).await
        }
    }

    /// Runs a statement outside any explicit transaction. The bookmark and
    /// access mode travel with the RUN from Bolt 3.
    pub async fn run_auto_commit(
        self,
        conn: &mut Connection,
        query: &str,
        parameters: BoltDict,
        bookmark: &Bookmark,
        mode: AccessMode,
    ) -> Result<PendingResult, BoltError> {
        let extra = match self {
            Self::V1 => None,
            _ => Some(tx_metadata(bookmark, mode)),
        };
        self.run(conn, query, parameters, extra).await
    }

    /// Runs a statement inside the transaction open on `conn`.
    pub async fn run_in_transaction(
        self,
        conn: &mut Connection,
        query: &str,
        parameters: BoltDict,
    ) -> Result<PendingResult, BoltError> {
        let extra = match self {
            Self::V1 => None,
            _ => Some(BoltDict::new()),
        };
        self.run(conn, query, parameters, extra).await
    }

    async fn run(
        self,
        conn: &mut Connection,
        query: &str,
        parameters: BoltDict,
        extra: Option<BoltDict>,
    ) -> Result<PendingResult, BoltError> {
        let run = ClientMessage::Run {
            query: query.to_string(),
            parameters,
            extra,
        };
        let (run_handler, ack) = CompletionHandler::new();
        conn.write(&run, Box::new(run_handler))?;
        let (pull_handler, records) = StreamHandler::new();
        conn.write(&self.pull(), Box::new(pull_handler))?;
        conn.flush().await?;
        Ok(PendingResult { ack, records })
    }

    /// Opens a transaction. With no bookmark the BEGIN is only queued and
    /// goes out with the first statement; a failure then surfaces on that
    /// statement. With a bookmark the server must confirm it has caught up,
    /// so this waits for the reply.
    pub async fn begin_transaction(
        self,
        conn: &mut Connection,
        bookmark: &Bookmark,
        mode: AccessMode,
    ) -> Result<(), BoltError> {
        let messages = match self {
            Self::V1 => vec![
                ClientMessage::Run {
                    query: "BEGIN".into(),
                    parameters: bookmark.to_begin_parameters(),
                    extra: None,
                },
                ClientMessage::PullAll,
            ],
            _ => vec![ClientMessage::Begin {
                extra: tx_metadata(bookmark, mode),
            }],
        };

        if bookmark.is_empty() {
            for msg in &messages {
                conn.write(msg, Box::new(NoOpHandler))?;
            }
            return Ok(());
        }
        request_all(conn, &messages).await.map(drop)
    }

    /// Commits and returns the bookmark the server issued, if any.
    pub async fn commit_transaction(self, conn: &mut Connection) -> Result<Option<Bookmark>, BoltError> {
        let messages = match self {
            Self::V1 => v1_statement("COMMIT"),
            _ => vec![ClientMessage::Commit],
        };
        let metadata = request_all(conn, &messages).await?;
        Ok(Bookmark::from_metadata(&metadata))
    }

    pub async fn rollback_transaction(self, conn: &mut Connection) -> Result<(), BoltError> {
        let messages = match self {
            Self::V1 => v1_statement("ROLLBACK"),
            _ => vec![ClientMessage::Rollback],
        };
        request_all(conn, &messages).await.map(drop)
    }

    /// Round-trips a RESET. Doubles as the idle-connection liveness probe.
    pub async fn reset(self, conn: &mut Connection) -> Result<(), BoltError> {
        request_all(conn, &[ClientMessage::Reset]).await.map(drop)
    }

    /// The discovery statement and its parameters.
    pub fn routing_procedure(self, context: &BoltDict) -> (&'static str, BoltDict) {
        match self {
            Self::V1 => (GET_SERVERS, BoltDict::new()),
            _ => (
                GET_ROUTING_TABLE,
                BoltDict::from([("context".to_string(), BoltValue::Dict(context.clone()))]),
            ),
        }
    }
}

fn tx_metadata(bookmark: &Bookmark, mode: AccessMode) -> BoltDict {
    let mut extra = BoltDict::new();
    if !bookmark.is_empty() {
        extra.insert("bookmarks".to_string(), bookmark.to_value());
    }
    if mode == AccessMode::Read {
        extra.insert("mode".to_string(), BoltValue::from("r"));
    }
    extra
}

fn v1_statement(query: &str) -> Vec<ClientMessage> {
    vec![
        ClientMessage::Run {
            query: query.to_string(),
            parameters: BoltDict::new(),
            extra: None,
        },
        ClientMessage::PullAll,
    ]
}

/// Writes `messages`, flushes, and waits for every reply. Returns the last
/// reply's metadata.
async fn request_all(conn: &mut Connection, messages: &[ClientMessage]) -> Result<BoltDict, BoltError> {
    let mut receivers = Vec::with_capacity(messages.len());
    for msg in messages {
        let (handler, rx) = CompletionHandler::new();
        conn.write(msg, Box::new(handler))?;
        receivers.push(rx);
    }
    conn.flush().await?;

    let mut metadata = BoltDict::new();
    for rx in receivers {
        metadata = completed(rx).await?;
    }
    Ok(metadata)
}
