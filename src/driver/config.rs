//! Driver configuration.

use std::time::Duration;

use crate::error::BoltError;
use crate::version::ProtocolTable;

/// Driver settings. Start from [`Config::default`] and override fields:
///
/// ```
/// use std::time::Duration;
/// use boltr_driver::driver::Config;
///
/// let config = Config {
///     max_connection_pool_size: 10,
///     connection_timeout: Duration::from_secs(5),
///     ..Config::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Connections per server address, idle and in use together.
    pub max_connection_pool_size: usize,
    /// How long `acquire` waits for a free connection before giving up.
    pub connection_acquisition_timeout: Duration,
    /// Budget for connect, handshake and initialization of one connection.
    pub connection_timeout: Duration,
    /// Pooled connections idle for longer are probed with RESET before
    /// reuse. `None` turns the probe off.
    pub idle_time_before_connection_test: Option<Duration>,
    pub user_agent: String,
    /// Log an error naming the creation site of sessions dropped without
    /// `close()` while they still had work in progress.
    pub leaked_session_logging: bool,
    /// Versions offered in the handshake.
    pub protocol_versions: ProtocolTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connection_pool_size: 100,
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            idle_time_before_connection_test: Some(Duration::from_millis(200)),
            user_agent: concat!("boltr-driver/", env!("CARGO_PKG_VERSION")).to_string(),
            leaked_session_logging: false,
            protocol_versions: ProtocolTable::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), BoltError> {
        let invalid = |what: &str| Err(BoltError::Configuration(what.to_string()));
        if self.max_connection_pool_size == 0 {
            return invalid("max_connection_pool_size must be at least 1");
        }
        if self.connection_acquisition_timeout.is_zero() {
            return invalid("connection_acquisition_timeout must be positive");
        }
        if self.connection_timeout.is_zero() {
            return invalid("connection_timeout must be positive");
        }
        if self.user_agent.trim().is_empty() {
            return invalid("user_agent must not be empty");
        }
        if self.protocol_versions.versions().is_empty() {
            return invalid("protocol_versions must offer at least one version");
        }
        Ok(())
    }
}
