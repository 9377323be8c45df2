//! Error types for the Bolt driver.

use crate::types::BoltDict;

/// Failure codes that mean the server is no longer in the role it was
/// picked for (e.g. a follower asked to write).
const ROLE_CHANGE_CODES: [&str; 2] = [
    "Neo.ClientError.Cluster.NotALeader",
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
];

/// Errors that can occur while talking to a Bolt server.
#[derive(Debug, thiserror::Error)]
pub enum BoltError {
    /// Malformed message, unknown marker or unsupported version. Fatal to
    /// the connection it happened on.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    /// Transport-level failure: refused connect, timeout, unexpected close.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// No server could serve the request (e.g. every router failed discovery).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The chosen server is no longer in the requested role. Retryable
    /// after the routing table has been refreshed.
    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("transient error {code}: {message}")]
    Transient { code: String, message: String },

    #[error("query error {code}: {message}")]
    Query { code: String, message: String },

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A session was asked to run two units of work at once, or used after close.
    #[error("concurrent use: {0}")]
    ConcurrentUse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Pool acquisition timed out: the server is busy, not down.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoltError {
    /// Wraps any displayable error as a connectivity error.
    pub fn connectivity(e: impl std::fmt::Display) -> Self {
        Self::Connectivity(e.to_string())
    }

    /// Classifies a server FAILURE metadata dictionary.
    pub fn from_failure(metadata: &BoltDict) -> Self {
        let code = metadata
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("Neo.DatabaseError.General.UnknownError")
            .to_string();
        let message = metadata
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("server reported a failure")
            .to_string();

        if ROLE_CHANGE_CODES.contains(&code.as_str()) {
            Self::SessionExpired(format!("{code}: {message}"))
        } else if code.starts_with("Neo.ClientError.Security.") {
            Self::Authentication(message)
        } else if code.starts_with("Neo.TransientError.") {
            Self::Transient { code, message }
        } else {
            Self::Query { code, message }
        }
    }

    /// Returns the server failure code, if this error came from a FAILURE.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Transient { code, .. } | Self::Query { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether a caller-side retry policy may retry the unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired(_) | Self::Transient { .. } | Self::ServiceUnavailable(_)
        )
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Io(_))
    }

    /// Precondition violations made by the caller. Never retryable.
    pub fn is_client_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(_) | Self::ConcurrentUse(_) | Self::Configuration(_)
        )
    }

    /// Errors after which the connection must not be reused.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Connectivity(_) | Self::Io(_))
    }
}
