//! Sessions: one logical unit of work at a time against the database.
//!
//! A session runs either a single auto-commit statement or one explicit
//! [`Transaction`] at a time and carries the bookmark that chains its
//! units of work for causal consistency.

mod bookmark;
mod cursor;
mod transaction;

use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub use bookmark::Bookmark;
pub use cursor::{Counters, QueryType, Record, ResultCursor, ResultSummary};
pub use transaction::{Transaction, TransactionState};

use self::cursor::AutoCommitGuard;
use self::transaction::TxInner;
use crate::error::BoltError;
use crate::protocol::handlers::completed;
use crate::provider::ConnectionProvider;
use crate::types::BoltDict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
        }
    }
}

/// What the session is busy with.
enum Work {
    AutoCommit,
    Transaction(Weak<TxInner>),
}

pub(crate) struct SessionState {
    pub(crate) bookmark: Bookmark,
    work: Option<Work>,
    open: bool,
}

pub(crate) type SessionHandle = Arc<Mutex<SessionState>>;

pub struct Session {
    provider: Arc<dyn ConnectionProvider>,
    mode: AccessMode,
    state: SessionHandle,
    created_at: &'static Location<'static>,
    leak_logging: bool,
}

impl Session {
    #[track_caller]
    pub(crate) fn new(
        provider: Arc<dyn ConnectionProvider>,
        mode: AccessMode,
        bookmark: Bookmark,
        leak_logging: bool,
    ) -> Self {
        Self {
            provider,
            mode,
            state: Arc::new(Mutex::new(SessionState {
                bookmark,
                work: None,
                open: true,
            })),
            created_at: Location::caller(),
            leak_logging,
        }
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    /// The bookmark of the last committed unit of work (or the one the
    /// session started with).
    pub fn last_bookmark(&self) -> Bookmark {
        self.state.lock().bookmark.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Reserves the session for `work`, failing if it is closed or busy.
    fn claim(&self, work: Work) -> Result<Bookmark, BoltError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(BoltError::ConcurrentUse("session is closed".into()));
        }
        match state.work {
            Some(Work::AutoCommit) => Err(BoltError::ConcurrentUse(
                "session still has an unconsumed result; consume it before running more work".into(),
            )),
            Some(Work::Transaction(_)) => Err(BoltError::ConcurrentUse(
                "session has an open transaction; close it before running more work".into(),
            )),
            None => {
                state.work = Some(work);
                Ok(state.bookmark.clone())
            }
        }
    }

    fn unclaim(&self) {
        self.state.lock().work = None;
    }

    /// Runs `query` as an auto-commit statement.
    ///
    /// Returns once the server has accepted the statement, so syntax and
    /// similar errors surface here. The connection stays with the cursor
    /// until the result is read to the end.
    pub async fn run(&self, query: &str, parameters: Option<BoltDict>) -> Result<ResultCursor, BoltError> {
        let bookmark = self.claim(Work::AutoCommit)?;
        let result = self.start_auto_commit(query, parameters.unwrap_or_default(), &bookmark).await;
        if result.is_err() {
            self.unclaim();
        }
        result
    }

    async fn start_auto_commit(
        &self,
        query: &str,
        parameters: BoltDict,
        bookmark: &Bookmark,
    ) -> Result<ResultCursor, BoltError> {
        let mut conn = self.provider.acquire_connection(self.mode).await?;
        let protocol = conn.protocol();
        let server = conn.address().clone();
        let pending = protocol
            .run_auto_commit(&mut conn, query, parameters, bookmark, self.mode)
            .await?;
        let run = completed(pending.ack).await?;
        let guard = AutoCommitGuard::new(conn, Arc::clone(&self.state));
        Ok(ResultCursor::new(run, server, pending.records, Some(guard)))
    }

    /// Opens a transaction on a connection chosen for the session's access
    /// mode. A supplied bookmark replaces the session's before BEGIN.
    pub async fn begin_transaction(&self, bookmark: Option<Bookmark>) -> Result<Transaction, BoltError> {
        let mut current = self.claim(Work::Transaction(Weak::new()))?;
        if let Some(bookmark) = bookmark {
            self.state.lock().bookmark = bookmark.clone();
            current = bookmark;
        }

        let begun = async {
            let mut conn = self.provider.acquire_connection(self.mode).await?;
            let protocol = conn.protocol();
            protocol.begin_transaction(&mut conn, &current, self.mode).await?;
            Ok::<_, BoltError>(conn)
        }
        .await;

        match begun {
            Ok(conn) => {
                let tx = Transaction::new(conn, Arc::clone(&self.state));
                let still_open = {
                    let mut state = self.state.lock();
                    if state.open {
                        state.work = Some(Work::Transaction(Arc::downgrade(tx.inner())));
                    }
                    state.open
                };
                if still_open {
                    return Ok(tx);
                }
                // Closed while BEGIN was in flight: nothing could roll it back.
                if let Err(e) = tx.close().await {
                    tracing::debug!(error = %e, "rollback of orphaned transaction failed");
                }
                Err(BoltError::ConcurrentUse("session was closed while the transaction began".into()))
            }
            Err(e) => {
                self.unclaim();
                Err(e)
            }
        }
    }

    /// Closes the session, rolling back a transaction that is still open.
    /// Any later use fails with [`BoltError::ConcurrentUse`].
    pub async fn close(&self) -> Result<(), BoltError> {
        let open_tx = {
            let mut state = self.state.lock();
            if !state.open {
                return Ok(());
            }
            state.open = false;
            match &state.work {
                Some(Work::Transaction(tx)) => tx.upgrade(),
                _ => None,
            }
        };
        match open_tx {
            Some(tx) => tx.rollback_if_active().await,
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.leak_logging {
            return;
        }
        let state = self.state.lock();
        if state.open && state.work.is_some() {
            tracing::error!(
                created_at = %self.created_at,
                "session dropped without being closed while it still had work in progress"
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("created_at", &self.created_at)
            .finish()
    }
}
