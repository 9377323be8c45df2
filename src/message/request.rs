//! Client-to-server Bolt messages.

use crate::types::{BoltDict, BoltValue};

/// A message sent from the client to the server.
///
/// Some signatures are shared between protocol generations and told apart
/// by field count: INIT/HELLO, PULL_ALL/PULL and DISCARD_ALL/DISCARD.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Bolt 1/2 initialization with the auth token.
    Init { user_agent: String, auth: BoltDict },

    /// Bolt 3+ initialization. Carries the auth token up to 5.0.
    Hello { extra: BoltDict },

    /// Authenticate after HELLO (Bolt 5.1+).
    Logon { auth: BoltDict },

    Goodbye,

    /// Return the connection to a clean state. Used as the liveness probe.
    Reset,

    /// Run a statement. `extra` is absent before Bolt 3.
    Run {
        query: String,
        parameters: BoltDict,
        extra: Option<BoltDict>,
    },

    /// Bolt 1-3: stream every remaining record.
    PullAll,

    /// Bolt 1-3: drop every remaining record.
    DiscardAll,

    /// Bolt 4+: stream records, `{n: -1}` meaning all.
    Pull { extra: BoltDict },

    /// Bolt 4+: drop records.
    Discard { extra: BoltDict },

    Begin { extra: BoltDict },
    Commit,
    Rollback,
}

impl ClientMessage {
    /// PULL asking for all remaining records.
    pub fn pull_all() -> Self {
        Self::Pull {
            extra: n_all(),
        }
    }

    /// DISCARD dropping all remaining records.
    pub fn discard_all() -> Self {
        Self::Discard {
            extra: n_all(),
        }
    }

    /// Wire name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "INIT",
            Self::Hello { .. } => "HELLO",
            Self::Logon { .. } => "LOGON",
            Self::Goodbye => "GOODBYE",
            Self::Reset => "RESET",
            Self::Run { .. } => "RUN",
            Self::PullAll => "PULL_ALL",
            Self::DiscardAll => "DISCARD_ALL",
            Self::Pull { .. } => "PULL",
            Self::Discard { .. } => "DISCARD",
            Self::Begin { .. } => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
        }
    }

    /// Whether the reply may be preceded by RECORD messages.
    pub fn streams_records(&self) -> bool {
        matches!(self, Self::PullAll | Self::Pull { .. })
    }
}

fn n_all() -> BoltDict {
    BoltDict::from([("n".to_string(), BoltValue::Integer(-1))])
}
