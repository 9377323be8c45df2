//! The entry point: a [`Driver`] built from a URI, handing out sessions.
//!
//! `bolt://host:port` gives a driver bound to one server.
//! `bolt+routing://host:port?context` gives a cluster driver that discovers
//! the topology through the given router and routes each session by its
//! access mode.

mod address;
mod auth;
mod config;
mod uri;

use std::sync::Arc;

pub use address::{BoltAddress, DEFAULT_PORT};
pub use auth::AuthToken;
pub use config::Config;
pub use uri::{normalize_uris, DriverUri, Scheme};

use crate::connection::{Connector, FailureListener, TcpTransport, Transport};
use crate::error::BoltError;
use crate::pool::{ConnectionPool, PoolSettings};
use crate::provider::{ConnectionProvider, DirectConnectionProvider};
use crate::routing::{LoadBalancer, Rediscovery, RoutingTable, RoutingTableHandle};
use crate::session::{AccessMode, Bookmark, Session};

pub struct Driver {
    provider: Arc<dyn ConnectionProvider>,
    scheme: Scheme,
    address: BoltAddress,
    leaked_session_logging: bool,
}

impl Driver {
    /// Builds a driver for `uri` over plain TCP. Performs no I/O: the URI
    /// and config are checked here, servers are contacted on first use.
    pub fn new(uri: &str, auth: AuthToken, config: Config) -> Result<Self, BoltError> {
        Self::with_transport(uri, auth, config, Arc::new(TcpTransport))
    }

    /// Like [`new`](Self::new) with a custom transport (TLS, tests).
    pub fn with_transport(
        uri: &str,
        auth: AuthToken,
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BoltError> {
        config.validate()?;
        let uri = DriverUri::parse(uri)?;

        let connector = Connector::new(
            transport,
            config.protocol_versions.clone(),
            config.user_agent.clone(),
            auth.to_dict(),
            config.connection_timeout,
        );
        let settings = PoolSettings {
            max_size: config.max_connection_pool_size,
            acquisition_timeout: config.connection_acquisition_timeout,
            idle_time_before_test: config.idle_time_before_connection_test,
        };

        let provider: Arc<dyn ConnectionProvider> = match uri.scheme {
            Scheme::Direct => {
                let pool = ConnectionPool::new(connector, settings);
                Arc::new(DirectConnectionProvider::new(uri.address.clone(), Arc::new(pool)))
            }
            Scheme::Routing => {
                let seeds = vec![uri.address.clone()];
                let handle = Arc::new(RoutingTableHandle::new(RoutingTable::new(seeds.clone())));
                let pool = ConnectionPool::new(
                    connector.with_routing_context(uri.routing_context.clone()),
                    settings,
                )
                .with_listener(Arc::clone(&handle) as Arc<dyn FailureListener>);
                Arc::new(LoadBalancer::new(
                    seeds,
                    Arc::new(pool),
                    handle,
                    Rediscovery::new(uri.routing_context),
                ))
            }
        };

        tracing::debug!(address = %uri.address, scheme = ?uri.scheme, "driver created");
        Ok(Self {
            provider,
            scheme: uri.scheme,
            address: uri.address,
            leaked_session_logging: config.leaked_session_logging,
        })
    }

    /// Builds a cluster driver from the first of `uris` whose routers
    /// answer discovery. Entries without a scheme are taken as
    /// `bolt+routing://`.
    pub async fn routing<S: AsRef<str>>(uris: &[S], auth: AuthToken, config: Config) -> Result<Self, BoltError> {
        Self::routing_with_transport(uris, auth, config, Arc::new(TcpTransport)).await
    }

    pub async fn routing_with_transport<S: AsRef<str>>(
        uris: &[S],
        auth: AuthToken,
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BoltError> {
        for uri in uris.iter().map(AsRef::as_ref) {
            let uri = if uri.contains("://") {
                uri.to_string()
            } else {
                format!("bolt+routing://{uri}")
            };
            let driver = Self::with_transport(&uri, auth.clone(), config.clone(), Arc::clone(&transport))?;
            if !driver.is_routing() {
                return Err(BoltError::Configuration(format!(
                    "a routing driver needs 'bolt+routing' URIs, got '{uri}'"
                )));
            }
            match driver.verify_connectivity().await {
                Ok(()) => return Ok(driver),
                Err(e) => {
                    tracing::warn!(error = %e, "Unable to create routing driver for URI: {uri}");
                    driver.close().await;
                }
            }
        }
        Err(BoltError::ServiceUnavailable(
            "failed to discover an available server".into(),
        ))
    }

    /// One URI gives a driver for it; several give a cluster driver over
    /// all of them (see [`normalize_uris`]).
    pub async fn from_uris<S: AsRef<str>>(
        uris: &[S],
        auth: AuthToken,
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BoltError> {
        match normalize_uris(uris).as_slice() {
            [] => Err(BoltError::Configuration("no URI given".into())),
            [single] => Self::with_transport(single, auth, config, transport),
            several => Self::routing_with_transport(several, auth, config, transport).await,
        }
    }

    /// A new session. Sessions are cheap: connections are taken from the
    /// pool only while a unit of work runs.
    #[track_caller]
    pub fn session(&self, mode: AccessMode, bookmark: Option<Bookmark>) -> Session {
        Session::new(
            Arc::clone(&self.provider),
            mode,
            bookmark.unwrap_or_default(),
            self.leaked_session_logging,
        )
    }

    /// Contacts the database: a connection for a direct driver, a routing
    /// table refresh for a cluster driver.
    pub async fn verify_connectivity(&self) -> Result<(), BoltError> {
        self.provider.verify_connectivity().await
    }

    /// Closes every pooled connection. Sessions opened afterwards fail to
    /// get a connection.
    pub async fn close(&self) {
        tracing::debug!(address = %self.address, "closing driver");
        self.provider.close().await;
    }

    pub fn is_routing(&self) -> bool {
        self.scheme == Scheme::Routing
    }

    /// The address from the URI (the seed router for a cluster driver).
    pub fn address(&self) -> &BoltAddress {
        &self.address
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("address", &self.address)
            .field("scheme", &self.scheme)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientMessage;
    use crate::test_support::{self, router, routing_record, StubTransport};
    use crate::types::BoltValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A server that counts statements and answers `RETURN 1`.
    fn counting(counter: Arc<AtomicUsize>) -> impl Fn(&ClientMessage) -> Vec<crate::message::ServerMessage> {
        move |msg| match msg {
            ClientMessage::Run { .. } => {
                counter.fetch_add(1, Ordering::SeqCst);
                vec![test_support::success([("fields", BoltValue::List(vec![BoltValue::from("1")]))])]
            }
            ClientMessage::Pull { .. } => vec![
                test_support::record(vec![BoltValue::Integer(1)]),
                test_support::success([]),
            ],
            other => test_support::default_reply(other),
        }
    }

    #[test]
    fn direct_uri_with_routing_parameters_fails_before_io() {
        let transport = Arc::new(StubTransport::new());
        let err = Driver::with_transport(
            "bolt://host/?policy=x",
            AuthToken::none(),
            Config::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .unwrap_err();
        assert!(matches!(err, BoltError::Configuration(_)));
        assert_eq!(transport.connects("host:7687"), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            max_connection_pool_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            Driver::new("bolt://localhost", AuthToken::none(), config),
            Err(BoltError::Configuration(_))
        ));
    }

    #[test]
    fn scheme_selects_driver_kind() {
        let direct = Driver::new("bolt://localhost:7687", AuthToken::none(), Config::default()).unwrap();
        assert!(!direct.is_routing());
        let routing = Driver::new("bolt+routing://core1?policy=eu", AuthToken::none(), Config::default()).unwrap();
        assert!(routing.is_routing());
        assert_eq!(routing.address(), &BoltAddress::new("core1", 7687));
    }

    #[tokio::test]
    async fn direct_driver_runs_statements() {
        let transport = Arc::new(StubTransport::new());
        let statements = Arc::new(AtomicUsize::new(0));
        transport.serve("db:7687", (4, 4), counting(Arc::clone(&statements)));
        let driver = Driver::with_transport(
            "bolt://db:7687",
            AuthToken::basic("neo4j", "secret"),
            Config::default(),
            transport,
        )
        .unwrap();

        driver.verify_connectivity().await.unwrap();
        let session = driver.session(AccessMode::Write, None);
        let record = session.run("RETURN 1", None).await.unwrap().single().await.unwrap();
        assert_eq!(record.values(), [BoltValue::Integer(1)]);
        session.close().await.unwrap();
        driver.close().await;
        assert_eq!(statements.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn routing_driver_sends_work_by_mode() {
        let transport = Arc::new(StubTransport::new());
        transport.serve(
            "core:7687",
            (4, 4),
            router(routing_record(300, &["core:7687"], &["reader:7687"], &["writer:7687"])),
        );
        let reads = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        transport.serve("reader:7687", (4, 4), counting(Arc::clone(&reads)));
        transport.serve("writer:7687", (4, 4), counting(Arc::clone(&writes)));

        let driver = Driver::routing_with_transport(
            &["core:7687"],
            AuthToken::none(),
            Config::default(),
            transport,
        )
        .await
        .unwrap();

        let read = driver.session(AccessMode::Read, None);
        read.run("RETURN 1", None).await.unwrap().consume().await.unwrap();
        let write = driver.session(AccessMode::Write, None);
        let tx = write.begin_transaction(None).await.unwrap();
        tx.run("RETURN 1", None).await.unwrap().consume().await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn routing_tries_each_uri() {
        let transport = Arc::new(StubTransport::new());
        transport.serve(
            "second:7687",
            (4, 4),
            router(routing_record(300, &["second:7687"], &["a:7687"], &["b:7687"])),
        );
        let driver = Driver::routing_with_transport(
            &["first:7687", "bolt+routing://second:7687"],
            AuthToken::none(),
            Config::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
        )
        .await
        .unwrap();
        assert_eq!(driver.address(), &BoltAddress::new("second", 7687));

        let err = Driver::routing_with_transport(
            &["first:7687", "third:7687"],
            AuthToken::none(),
            Config::default(),
            transport,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BoltError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn single_bare_uri_is_direct() {
        let transport = Arc::new(StubTransport::new());
        let driver = Driver::from_uris(&["db:7687"], AuthToken::none(), Config::default(), transport)
            .await
            .unwrap();
        assert!(!driver.is_routing());
    }
}
