//! Streaming access to one statement's result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{Bookmark, SessionHandle};
use crate::driver::BoltAddress;
use crate::error::BoltError;
use crate::pool::PooledConnection;
use crate::protocol::handlers::StreamEvent;
use crate::types::{BoltDict, BoltValue};

/// One row of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<[String]>,
    values: Vec<BoltValue>,
}

impl Record {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[BoltValue] {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&BoltValue> {
        let index = self.keys.iter().position(|k| k == key)?;
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<BoltValue> {
        self.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    SchemaWrite,
}

impl QueryType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            "w" => Some(Self::WriteOnly),
            "s" => Some(Self::SchemaWrite),
            _ => None,
        }
    }
}

/// Update statistics reported with the summary. Missing entries are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
}

impl Counters {
    fn from_stats(stats: &BoltDict) -> Self {
        let get = |key: &str| stats.get(key).and_then(BoltValue::as_int).unwrap_or(0);
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
        }
    }

    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
            || self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSummary {
    pub server: BoltAddress,
    pub query_type: Option<QueryType>,
    pub counters: Counters,
    /// Set when the statement ran outside an explicit transaction and the
    /// server issued a bookmark.
    pub bookmark: Option<Bookmark>,
    pub result_available_after: Option<Duration>,
    pub result_consumed_after: Option<Duration>,
    /// Everything else the server put in the final SUCCESS.
    pub metadata: BoltDict,
}

impl ResultSummary {
    fn new(server: BoltAddress, run: &BoltDict, metadata: BoltDict) -> Self {
        // Bolt 1 reports the timings under the long names.
        let millis = |dict: &BoltDict, keys: [&str; 2]| {
            keys.iter()
                .find_map(|k| dict.get(*k).and_then(BoltValue::as_int))
                .and_then(|ms| u64::try_from(ms).ok())
                .map(Duration::from_millis)
        };
        Self {
            server,
            query_type: metadata
                .get("type")
                .and_then(BoltValue::as_str)
                .and_then(QueryType::from_code),
            counters: metadata
                .get("stats")
                .and_then(BoltValue::as_dict)
                .map(Counters::from_stats)
                .unwrap_or_default(),
            bookmark: Bookmark::from_metadata(&metadata),
            result_available_after: millis(run, ["t_first", "result_available_after"]),
            result_consumed_after: millis(&metadata, ["t_last", "result_consumed_after"]),
            metadata,
        }
    }
}

/// The connection and session slot held by an auto-commit result until it
/// completes. Dropping it early disposes of the connection (its replies are
/// still outstanding) and frees the session.
pub(crate) struct AutoCommitGuard {
    conn: Option<PooledConnection>,
    session: SessionHandle,
}

impl AutoCommitGuard {
    pub(crate) fn new(conn: PooledConnection, session: SessionHandle) -> Self {
        Self {
            conn: Some(conn),
            session,
        }
    }

    fn complete(mut self, bookmark: Option<&Bookmark>) {
        // Give the connection back before the session can start new work.
        drop(self.conn.take());
        if let Some(bookmark) = bookmark {
            self.session.lock().bookmark = bookmark.clone();
        }
    }
}

impl Drop for AutoCommitGuard {
    fn drop(&mut self) {
        drop(self.conn.take());
        self.session.lock().work = None;
    }
}

enum CursorState {
    Streaming,
    Done(ResultSummary),
    Failed,
}

/// Records of one statement, read as they arrive.
///
/// An auto-commit cursor keeps its connection until the last record has
/// been read (or the cursor is dropped).
pub struct ResultCursor {
    keys: Arc<[String]>,
    run_metadata: BoltDict,
    server: BoltAddress,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    state: CursorState,
    guard: Option<AutoCommitGuard>,
}

impl ResultCursor {
    pub(crate) fn new(
        run_metadata: BoltDict,
        server: BoltAddress,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        guard: Option<AutoCommitGuard>,
    ) -> Self {
        let keys: Vec<String> = run_metadata
            .get("fields")
            .and_then(BoltValue::as_list)
            .map(|fields| fields.iter().filter_map(BoltValue::as_str).map(str::to_owned).collect())
            .unwrap_or_default();
        Self {
            keys: keys.into(),
            run_metadata,
            server,
            events,
            state: CursorState::Streaming,
            guard,
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// The next record, or `None` once the result is exhausted.
    pub async fn next(&mut self) -> Result<Option<Record>, BoltError> {
        match self.state {
            CursorState::Streaming => {}
            CursorState::Done(_) => return Ok(None),
            CursorState::Failed => {
                return Err(BoltError::InvalidState("result has already failed".into()));
            }
        }
        match self.events.recv().await {
            Some(StreamEvent::Record(values)) => Ok(Some(Record {
                keys: Arc::clone(&self.keys),
                values,
            })),
            Some(StreamEvent::Done(Ok(metadata))) => {
                let summary = ResultSummary::new(self.server.clone(), &self.run_metadata, metadata);
                if let Some(guard) = self.guard.take() {
                    guard.complete(summary.bookmark.as_ref());
                }
                self.state = CursorState::Done(summary);
                Ok(None)
            }
            Some(StreamEvent::Done(Err(e))) => Err(self.fail(e)),
            None => Err(self.fail(BoltError::Connectivity(
                "connection closed before the result was complete".into(),
            ))),
        }
    }

    fn fail(&mut self, error: BoltError) -> BoltError {
        self.state = CursorState::Failed;
        self.guard = None;
        error
    }

    /// Reads every remaining record.
    pub async fn list(&mut self) -> Result<Vec<Record>, BoltError> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Reads the only record of the result. Zero or several records are an
    /// error.
    pub async fn single(&mut self) -> Result<Record, BoltError> {
        let Some(record) = self.next().await? else {
            return Err(BoltError::InvalidState(
                "expected exactly one record, the result is empty".into(),
            ));
        };
        if self.next().await?.is_some() {
            self.consume_remaining().await?;
            return Err(BoltError::InvalidState(
                "expected exactly one record, the result has more".into(),
            ));
        }
        Ok(record)
    }

    async fn consume_remaining(&mut self) -> Result<(), BoltError> {
        while self.next().await?.is_some() {}
        Ok(())
    }

    /// Skips the remaining records and returns the summary.
    pub async fn consume(mut self) -> Result<ResultSummary, BoltError> {
        self.consume_remaining().await?;
        match std::mem::replace(&mut self.state, CursorState::Failed) {
            CursorState::Done(summary) => Ok(summary),
            _ => Err(BoltError::InvalidState("result has already failed".into())),
        }
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("keys", &self.keys)
            .field("server", &self.server)
            .field("done", &!matches!(self.state, CursorState::Streaming))
            .finish()
    }
}
