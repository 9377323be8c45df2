//! Explicit transactions.

use std::sync::Arc;

use parking_lot::Mutex;

use super::cursor::ResultCursor;
use super::SessionHandle;
use crate::error::BoltError;
use crate::pool::PooledConnection;
use crate::protocol::handlers::completed;
use crate::types::BoltDict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    /// A statement or the connection failed; the server has discarded the
    /// transaction.
    Failed,
}

pub(crate) struct TxInner {
    state: Mutex<TransactionState>,
    connection: tokio::sync::Mutex<Option<PooledConnection>>,
    session: SessionHandle,
}

impl TxInner {
    fn check_active(&self) -> Result<(), BoltError> {
        match *self.state.lock() {
            TransactionState::Active => Ok(()),
            state => Err(BoltError::InvalidState(format!(
                "transaction is {state:?}, no further operations are allowed"
            ))),
        }
    }

    /// Moves to a terminal state, hands the connection back and frees the
    /// session for new work.
    fn finish(&self, connection: &mut Option<PooledConnection>, state: TransactionState) {
        *self.state.lock() = state;
        drop(connection.take());
        self.session.lock().work = None;
    }

    /// Rolls back if still active. Used by `Session::close`.
    pub(crate) async fn rollback_if_active(&self) -> Result<(), BoltError> {
        let mut guard = self.connection.lock().await;
        if *self.state.lock() != TransactionState::Active {
            return Ok(());
        }
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        let protocol = conn.protocol();
        let result = protocol.rollback_transaction(conn).await;
        let state = if result.is_ok() {
            TransactionState::RolledBack
        } else {
            TransactionState::Failed
        };
        self.finish(&mut guard, state);
        result
    }
}

/// A transaction bound to one connection for its whole life.
///
/// Every operation after commit, rollback or a failure returns
/// [`BoltError::InvalidState`]. Dropping an active transaction disposes of
/// its connection, which makes the server roll it back.
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl Transaction {
    pub(crate) fn new(conn: PooledConnection, session: SessionHandle) -> Self {
        Self {
            inner: Arc::new(TxInner {
                state: Mutex::new(TransactionState::Active),
                connection: tokio::sync::Mutex::new(Some(conn)),
                session,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<TxInner> {
        &self.inner
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Runs a statement and waits for the server to accept it. Records are
    /// read through the returned cursor.
    pub async fn run(&self, query: &str, parameters: Option<BoltDict>) -> Result<ResultCursor, BoltError> {
        self.inner.check_active()?;
        let mut guard = self.inner.connection.lock().await;
        self.inner.check_active()?;
        let Some(conn) = guard.as_mut() else {
            return Err(BoltError::InvalidState("transaction has no connection".into()));
        };

        let protocol = conn.protocol();
        let server = conn.address().clone();
        let outcome = match protocol
            .run_in_transaction(conn, query, parameters.unwrap_or_default())
            .await
        {
            Ok(pending) => completed(pending.ack).await.map(|run| (run, pending.records)),
            Err(e) => Err(e),
        };
        match outcome {
            Ok((run, records)) => Ok(ResultCursor::new(run, server, records, None)),
            Err(e) => {
                self.inner.finish(&mut guard, TransactionState::Failed);
                Err(e)
            }
        }
    }

    /// Commits. The bookmark the server returns replaces the session's.
    pub async fn commit(&self) -> Result<(), BoltError> {
        self.inner.check_active()?;
        let mut guard = self.inner.connection.lock().await;
        self.inner.check_active()?;
        let Some(conn) = guard.as_mut() else {
            return Err(BoltError::InvalidState("transaction has no connection".into()));
        };

        let protocol = conn.protocol();
        match protocol.commit_transaction(conn).await {
            Ok(bookmark) => {
                if let Some(bookmark) = bookmark {
                    self.inner.session.lock().bookmark = bookmark;
                }
                self.inner.finish(&mut guard, TransactionState::Committed);
                Ok(())
            }
            Err(e) => {
                self.inner.finish(&mut guard, TransactionState::Failed);
                Err(e)
            }
        }
    }

    pub async fn rollback(&self) -> Result<(), BoltError> {
        self.inner.check_active()?;
        self.inner.rollback_if_active().await
    }

    /// Rolls back if still active, then releases the connection whatever
    /// the state.
    pub async fn close(&self) -> Result<(), BoltError> {
        let result = self.inner.rollback_if_active().await;
        let mut guard = self.inner.connection.lock().await;
        if guard.is_some() {
            let state = self.state();
            self.inner.finish(&mut guard, state);
        }
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        // Without an async context there is no ROLLBACK to send; a broken
        // connection is closed by the pool and the server aborts the work.
        if let Ok(mut guard) = self.inner.connection.try_lock() {
            if let Some(conn) = guard.as_ref() {
                tracing::debug!(connection_id = %conn.id(), "open transaction dropped");
                conn.mark_broken("transaction dropped while open");
            }
            self.inner.finish(&mut guard, TransactionState::RolledBack);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("state", &self.state()).finish()
    }
}
