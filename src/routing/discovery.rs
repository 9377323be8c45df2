//! Asking routers for the cluster topology.

use std::time::{Duration, Instant};

use crate::driver::BoltAddress;
use crate::error::BoltError;
use crate::pool::ConnectionPool;
use crate::session::{AccessMode, Bookmark};
use crate::types::{BoltDict, BoltValue};

const PROCEDURE_NOT_FOUND: &str = "Neo.ClientError.Procedure.ProcedureNotFound";

/// One discovery answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterComposition {
    pub expires_at: Instant,
    pub routers: Vec<BoltAddress>,
    pub readers: Vec<BoltAddress>,
    pub writers: Vec<BoltAddress>,
}

impl ClusterComposition {
    /// Parses the single record `[ttl, servers]` returned by the routing
    /// procedures. Each server entry is `{addresses: [..], role: ..}`.
    pub fn parse(record: &[BoltValue], now: Instant) -> Result<Self, BoltError> {
        let malformed = |what: &str| BoltError::Protocol(format!("malformed routing record: {what}"));

        let [ttl, servers] = record else {
            return Err(malformed("expected [ttl, servers]"));
        };
        let ttl = ttl.as_int().ok_or_else(|| malformed("ttl is not an integer"))?;
        let servers = servers.as_list().ok_or_else(|| malformed("servers is not a list"))?;

        let mut composition = Self {
            expires_at: now + Duration::from_secs(u64::try_from(ttl).unwrap_or(0)),
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
        };
        for server in servers {
            let server = server.as_dict().ok_or_else(|| malformed("server entry is not a map"))?;
            let role = server
                .get("role")
                .and_then(BoltValue::as_str)
                .ok_or_else(|| malformed("server entry has no role"))?;
            let addresses = server
                .get("addresses")
                .and_then(BoltValue::as_list)
                .ok_or_else(|| malformed("server entry has no addresses"))?;

            let target = match role.to_ascii_uppercase().as_str() {
                "ROUTE" => &mut composition.routers,
                "READ" => &mut composition.readers,
                "WRITE" => &mut composition.writers,
                other => {
                    tracing::debug!(role = other, "ignoring unknown server role");
                    continue;
                }
            };
            for address in addresses {
                let address = address.as_str().ok_or_else(|| malformed("address is not a string"))?;
                let address = BoltAddress::parse(address)?;
                if !target.contains(&address) {
                    target.push(address);
                }
            }
        }
        Ok(composition)
    }

    /// A composition is usable only if it names routers and readers. No
    /// writers is fine: the cluster may be between leaders.
    pub fn is_valid(&self) -> bool {
        !self.routers.is_empty() && !self.readers.is_empty()
    }
}

/// Runs the routing procedure against routers until one answers.
pub struct Rediscovery {
    context: BoltDict,
}

impl Rediscovery {
    pub fn new(context: BoltDict) -> Self {
        Self { context }
    }

    /// Tries `routers` in order and returns the first valid composition.
    ///
    /// A router that cannot be reached or answers with garbage is skipped
    /// with a warning. A router that does not know the routing procedure
    /// is not part of a cluster at all, which ends the lookup at once.
    pub async fn lookup(
        &self,
        routers: &[BoltAddress],
        pool: &ConnectionPool,
    ) -> Result<ClusterComposition, BoltError> {
        for router in routers {
            match self.lookup_on(router, pool).await {
                Ok(composition) if composition.is_valid() => return Ok(composition),
                Ok(_) => {
                    tracing::warn!(%router, "routing table from router has no routers or readers");
                }
                Err(e) if e.code() == Some(PROCEDURE_NOT_FOUND) => {
                    return Err(BoltError::ServiceUnavailable(format!(
                        "server {router} can not perform routing, make sure you are connecting to a cluster"
                    )));
                }
                Err(e) => {
                    tracing::warn!(%router, error = %e, "failed to update routing table");
                }
            }
        }
        Err(BoltError::ServiceUnavailable(
            "could not perform discovery, no routing servers available".into(),
        ))
    }

    async fn lookup_on(&self, router: &BoltAddress, pool: &ConnectionPool) -> Result<ClusterComposition, BoltError> {
        let mut conn = pool.acquire(router).await?;
        let protocol = conn.protocol();
        let (query, parameters) = protocol.routing_procedure(&self.context);
        let pending = protocol
            .run_auto_commit(&mut conn, query, parameters, &Bookmark::empty(), AccessMode::Write)
            .await?;
        let (_, records, _) = pending.collect().await?;
        drop(conn);

        match records.as_slice() {
            [record] => ClusterComposition::parse(record, Instant::now()),
            _ => Err(BoltError::Protocol(format!(
                "routing procedure returned {} records, expected 1",
                records.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connector;
    use crate::message::{ClientMessage, ServerMessage};
    use crate::pool::PoolSettings;
    use crate::test_support::{self, router, routing_record, StubTransport};
    use crate::version::ProtocolTable;
    use std::sync::Arc;

    fn pool(transport: Arc<StubTransport>) -> ConnectionPool {
        let connector = Connector::new(
            transport,
            ProtocolTable::default(),
            "test",
            BoltDict::new(),
            Duration::from_secs(5),
        );
        ConnectionPool::new(
            connector,
            PoolSettings {
                max_size: 2,
                acquisition_timeout: Duration::from_secs(1),
                idle_time_before_test: None,
            },
        )
    }

    fn addrs(names: &[&str]) -> Vec<BoltAddress> {
        names.iter().map(|n| BoltAddress::parse(n).unwrap()).collect()
    }

    #[test]
    fn parses_routing_record() {
        let now = Instant::now();
        let record = routing_record(300, &["r1:7687", "r2:7687"], &["a:7687"], &["b:7688"]);
        let composition = ClusterComposition::parse(&record, now).unwrap();
        assert_eq!(composition.routers, addrs(&["r1:7687", "r2:7687"]));
        assert_eq!(composition.readers, addrs(&["a:7687"]));
        assert_eq!(composition.writers, addrs(&["b:7688"]));
        assert_eq!(composition.expires_at, now + Duration::from_secs(300));
        assert!(composition.is_valid());
    }

    #[test]
    fn missing_readers_is_invalid() {
        let record = routing_record(300, &["r1:7687"], &[], &["b:7687"]);
        assert!(!ClusterComposition::parse(&record, Instant::now()).unwrap().is_valid());
    }

    #[test]
    fn rejects_malformed_records() {
        let now = Instant::now();
        assert!(ClusterComposition::parse(&[BoltValue::Integer(1)], now).is_err());
        assert!(ClusterComposition::parse(&[BoltValue::from("x"), BoltValue::List(vec![])], now).is_err());
        let bad_entry = [BoltValue::Integer(1), BoltValue::List(vec![BoltValue::Integer(3)])];
        assert!(ClusterComposition::parse(&bad_entry, now).is_err());
    }

    #[tokio::test]
    async fn skips_unreachable_router() {
        let transport = Arc::new(StubTransport::new());
        transport.serve(
            "r2:7687",
            (3, 0),
            router(routing_record(300, &["r1:7687", "r2:7687"], &["a:7687"], &["b:7687"])),
        );
        let pool = pool(Arc::clone(&transport));

        let composition = Rediscovery::new(BoltDict::new())
            .lookup(&addrs(&["r1:7687", "r2:7687"]), &pool)
            .await
            .unwrap();
        assert_eq!(composition.readers, addrs(&["a:7687"]));
        assert_eq!(composition.writers, addrs(&["b:7687"]));
        assert_eq!(transport.connects("r1:7687"), 0);
        assert_eq!(transport.connects("r2:7687"), 1);
    }

    #[tokio::test]
    async fn v1_router_uses_get_servers() {
        let transport = Arc::new(StubTransport::new());
        let record = routing_record(10, &["r1:7687"], &["a:7687"], &[]);
        let respond = router(record);
        transport.serve("r1:7687", (1, 0), move |msg| {
            if let ClientMessage::Run { query, parameters, .. } = msg {
                if query.contains("routing") {
                    assert_eq!(query, "CALL dbms.cluster.routing.getServers");
                    assert!(parameters.is_empty());
                }
            }
            respond(msg)
        });
        let pool = pool(Arc::clone(&transport));

        let composition = Rediscovery::new(BoltDict::new())
            .lookup(&addrs(&["r1:7687"]), &pool)
            .await
            .unwrap();
        assert!(composition.writers.is_empty());
    }

    #[tokio::test]
    async fn missing_procedure_is_service_unavailable() {
        let transport = Arc::new(StubTransport::new());
        transport.serve("single:7687", (4, 4), |msg| match msg {
            ClientMessage::Run { .. } => vec![
                test_support::failure(PROCEDURE_NOT_FOUND, "no such procedure"),
                ServerMessage::Ignored,
            ],
            other => test_support::default_reply(other),
        });
        transport.serve(
            "r2:7687",
            (4, 4),
            router(routing_record(300, &["r2:7687"], &["a:7687"], &["b:7687"])),
        );
        let pool = pool(Arc::clone(&transport));

        let err = Rediscovery::new(BoltDict::new())
            .lookup(&addrs(&["single:7687", "r2:7687"]), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, BoltError::ServiceUnavailable(_)));
        assert_eq!(transport.connects("r2:7687"), 0);
    }

    #[tokio::test]
    async fn all_routers_failing_is_service_unavailable() {
        let transport = Arc::new(StubTransport::new());
        transport.serve("r2:7687", (4, 4), router(routing_record(300, &[], &[], &[])));
        let pool = pool(Arc::clone(&transport));

        let err = Rediscovery::new(BoltDict::new())
            .lookup(&addrs(&["r1:7687", "r2:7687"]), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, BoltError::ServiceUnavailable(_)));
    }
}
