//! Routing connection provider.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::discovery::Rediscovery;
use super::table::RoutingTable;
use crate::connection::FailureListener;
use crate::driver::BoltAddress;
use crate::error::BoltError;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::provider::ConnectionProvider;
use crate::session::AccessMode;

/// The routing table as seen by connections: failures they observe remove
/// the server from the table.
pub struct RoutingTableHandle {
    table: Mutex<RoutingTable>,
}

impl RoutingTableHandle {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    pub fn snapshot(&self) -> RoutingTable {
        self.table.lock().clone()
    }

    fn forget(&self, address: &BoltAddress) {
        self.table.lock().forget(address);
    }
}

impl FailureListener for RoutingTableHandle {
    fn on_connection_failure(&self, address: &BoltAddress) {
        tracing::debug!(%address, "removing unreachable server from routing table");
        self.forget(address);
    }

    fn on_write_failure(&self, address: &BoltAddress) {
        tracing::debug!(%address, "removing former leader from writers");
        self.table.lock().forget_writer(address);
    }
}

/// Picks readers and writers from a routing table kept fresh by
/// discovery.
pub struct LoadBalancer {
    pool: Arc<ConnectionPool>,
    handle: Arc<RoutingTableHandle>,
    rediscovery: Rediscovery,
    /// Routers given at startup; asked again when every known router fails.
    seed_routers: Vec<BoltAddress>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl LoadBalancer {
    /// `pool` must report connection failures to `handle`.
    pub fn new(
        seed_routers: Vec<BoltAddress>,
        pool: Arc<ConnectionPool>,
        handle: Arc<RoutingTableHandle>,
        rediscovery: Rediscovery,
    ) -> Self {
        Self {
            pool,
            handle,
            rediscovery,
            seed_routers,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn routing_table(&self) -> RoutingTable {
        self.handle.snapshot()
    }

    /// Refreshes the routing table if it cannot serve `mode`. Concurrent
    /// callers wait for a single refresh.
    pub async fn ensure_fresh(&self, mode: AccessMode) -> Result<(), BoltError> {
        if !self.handle.table.lock().is_stale_for(mode) {
            return Ok(());
        }
        let _refresh = self.refresh_lock.lock().await;
        let mut routers = {
            let table = self.handle.table.lock();
            if !table.is_stale_for(mode) {
                return Ok(());
            }
            table.routers().to_vec()
        };
        for seed in &self.seed_routers {
            if !routers.contains(seed) {
                routers.push(seed.clone());
            }
        }

        tracing::debug!(%mode, ?routers, "refreshing routing table");
        let composition = self.rediscovery.lookup(&routers, &self.pool).await?;
        let servers = {
            let mut table = self.handle.table.lock();
            table.update(composition);
            tracing::debug!(
                routers = ?table.routers(),
                readers = ?table.readers(),
                writers = ?table.writers(),
                "routing table updated"
            );
            table.servers()
        };
        self.pool.retain_all(&servers).await;
        Ok(())
    }
}

#[async_trait]
impl ConnectionProvider for LoadBalancer {
    async fn acquire_connection(&self, mode: AccessMode) -> Result<PooledConnection, BoltError> {
        self.ensure_fresh(mode).await?;
        loop {
            let next = self.handle.table.lock().address_for(mode);
            let Some(address) = next else {
                return Err(BoltError::SessionExpired(format!(
                    "failed to obtain connection towards {mode} server, known routing table has no usable servers"
                )));
            };
            match self.pool.acquire(&address).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_connectivity() => {
                    tracing::warn!(%address, error = %e, "server unreachable, removing it from the routing table");
                    self.handle.forget(&address);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Forces discovery through the seed routers.
    async fn verify_connectivity(&self) -> Result<(), BoltError> {
        self.ensure_fresh(AccessMode::Read).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connector;
    use crate::message::{ClientMessage, ServerMessage};
    use crate::pool::PoolSettings;
    use crate::test_support::{self, routing_record, StubTransport};
    use crate::types::{BoltDict, BoltValue};
    use crate::version::ProtocolTable;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn balancer(transport: Arc<StubTransport>, seeds: &[&str]) -> LoadBalancer {
        let seeds: Vec<_> = seeds.iter().map(|s| addr(s)).collect();
        let handle = Arc::new(RoutingTableHandle::new(RoutingTable::new(seeds.clone())));
        let connector = Connector::new(
            transport,
            ProtocolTable::default(),
            "test",
            BoltDict::new(),
            Duration::from_secs(5),
        );
        let pool = ConnectionPool::new(
            connector,
            PoolSettings {
                max_size: 4,
                acquisition_timeout: Duration::from_secs(1),
                idle_time_before_test: None,
            },
        )
        .with_listener(Arc::clone(&handle) as Arc<dyn FailureListener>);
        LoadBalancer::new(seeds, Arc::new(pool), handle, Rediscovery::new(BoltDict::new()))
    }

    /// Serves discovery at `address`: the n-th lookup gets `answers[n]`,
    /// later ones the last answer. Returns the lookup counter.
    fn serve_router(transport: &StubTransport, address: &str, answers: Vec<Vec<BoltValue>>) -> Arc<AtomicUsize> {
        let lookups = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&lookups);
        transport.serve(address, (4, 4), move |msg| match msg {
            ClientMessage::Run { .. } => {
                seen.fetch_add(1, Ordering::SeqCst);
                vec![test_support::success([(
                    "fields",
                    BoltValue::List(vec![BoltValue::from("ttl"), BoltValue::from("servers")]),
                )])]
            }
            ClientMessage::Pull { .. } => {
                let n = seen.load(Ordering::SeqCst).saturating_sub(1).min(answers.len() - 1);
                vec![test_support::record(answers[n].clone()), test_support::success([])]
            }
            other => test_support::default_reply(other),
        });
        lookups
    }

    fn addr(name: &str) -> BoltAddress {
        BoltAddress::parse(name).unwrap()
    }

    #[tokio::test]
    async fn discovery_skips_dead_router() {
        let transport = Arc::new(StubTransport::new());
        serve_router(
            &transport,
            "r2:7687",
            vec![routing_record(300, &["r1:7687", "r2:7687"], &["a:7687"], &["b:7687"])],
        );
        let lb = balancer(Arc::clone(&transport), &["r1:7687", "r2:7687"]);

        lb.ensure_fresh(AccessMode::Read).await.unwrap();
        let table = lb.routing_table();
        assert_eq!(table.readers(), [addr("a:7687")]);
        assert_eq!(table.writers(), [addr("b:7687")]);
    }

    #[tokio::test]
    async fn readers_are_used_round_robin() {
        let transport = Arc::new(StubTransport::new());
        let lookups = serve_router(
            &transport,
            "r:7687",
            vec![routing_record(300, &["r:7687"], &["a:7687", "b:7687", "c:7687"], &["w:7687"])],
        );
        for name in ["a:7687", "b:7687", "c:7687"] {
            transport.serve(name, (4, 4), test_support::default_reply);
        }
        let lb = balancer(Arc::clone(&transport), &["r:7687"]);

        let mut picked = Vec::new();
        for _ in 0..4 {
            let conn = lb.acquire_connection(AccessMode::Read).await.unwrap();
            picked.push(conn.address().clone());
        }
        assert_eq!(
            picked,
            [addr("a:7687"), addr("b:7687"), addr("c:7687"), addr("a:7687")]
        );
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_reader_is_forgotten() {
        let transport = Arc::new(StubTransport::new());
        serve_router(
            &transport,
            "r:7687",
            vec![routing_record(300, &["r:7687"], &["down:7687", "a:7687"], &["w:7687"])],
        );
        transport.serve("a:7687", (4, 4), test_support::default_reply);
        let lb = balancer(Arc::clone(&transport), &["r:7687"]);

        let conn = lb.acquire_connection(AccessMode::Read).await.unwrap();
        assert_eq!(conn.address(), &addr("a:7687"));
        assert_eq!(lb.routing_table().readers(), [addr("a:7687")]);
    }

    #[tokio::test]
    async fn dry_list_is_session_expired() {
        let transport = Arc::new(StubTransport::new());
        serve_router(
            &transport,
            "r:7687",
            vec![routing_record(300, &["r:7687"], &["a:7687"], &["down:7687"])],
        );
        let lb = balancer(Arc::clone(&transport), &["r:7687"]);

        let err = lb.acquire_connection(AccessMode::Write).await.unwrap_err();
        assert!(matches!(err, BoltError::SessionExpired(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn not_a_leader_forces_refresh() {
        let transport = Arc::new(StubTransport::new());
        let lookups = serve_router(
            &transport,
            "r:7687",
            vec![routing_record(300, &["r:7687"], &["a:7687"], &["b:7687"])],
        );
        transport.serve("b:7687", (4, 4), |msg| match msg {
            ClientMessage::Run { .. } => vec![
                test_support::failure("Neo.ClientError.Cluster.NotALeader", "not the leader"),
                ServerMessage::Ignored,
            ],
            other => test_support::default_reply(other),
        });
        let lb = balancer(Arc::clone(&transport), &["r:7687"]);

        let mut conn = lb.acquire_connection(AccessMode::Write).await.unwrap();
        let protocol = conn.protocol();
        let pending = protocol
            .run_in_transaction(&mut conn, "CREATE ()", BoltDict::new())
            .await
            .unwrap();
        assert!(matches!(pending.collect().await, Err(BoltError::SessionExpired(_))));
        drop(conn);

        let table = lb.routing_table();
        assert!(table.writers().is_empty());
        assert_eq!(table.readers(), [addr("a:7687")]);
        assert!(table.is_stale_for(AccessMode::Write));
        assert_eq!(lookups.load(Ordering::SeqCst), 1);

        // The next write refreshes before picking an address.
        drop(lb.acquire_connection(AccessMode::Write).await.unwrap());
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_purges_departed_servers() {
        let transport = Arc::new(StubTransport::new());
        serve_router(
            &transport,
            "r:7687",
            vec![
                routing_record(0, &["r:7687"], &["old:7687"], &["w:7687"]),
                routing_record(300, &["r:7687"], &["new:7687"], &["w:7687"]),
            ],
        );
        transport.serve("old:7687", (4, 4), test_support::default_reply);
        transport.serve("new:7687", (4, 4), test_support::default_reply);
        let lb = balancer(Arc::clone(&transport), &["r:7687"]);

        drop(lb.acquire_connection(AccessMode::Read).await.unwrap());
        assert!(lb.pool.has_address(&addr("old:7687")));

        // The first table expired on arrival.
        let conn = lb.acquire_connection(AccessMode::Read).await.unwrap();
        assert_eq!(conn.address(), &addr("new:7687"));
        assert!(!lb.pool.has_address(&addr("old:7687")));
    }

    #[tokio::test]
    async fn seed_router_is_asked_when_known_routers_fail() {
        let transport = Arc::new(StubTransport::new());
        let lookups = serve_router(
            &transport,
            "seed:7687",
            vec![routing_record(300, &["gone:7687"], &["a:7687"], &["b:7687"])],
        );
        let lb = balancer(Arc::clone(&transport), &["seed:7687"]);
        lb.ensure_fresh(AccessMode::Read).await.unwrap();
        assert_eq!(lb.routing_table().routers(), [addr("gone:7687")]);

        lb.handle.forget(&addr("a:7687"));
        lb.ensure_fresh(AccessMode::Read).await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        assert_eq!(lb.routing_table().readers(), [addr("a:7687")]);
    }
}
