//! Where sessions get their connections from.

use std::sync::Arc;

use async_trait::async_trait;

use crate::driver::BoltAddress;
use crate::error::BoltError;
use crate::pool::{ConnectionPool, PooledConnection};
use crate::session::AccessMode;

/// Hands out connections suitable for an access mode. The direct provider
/// ignores the mode; the routing provider picks a reader or a writer.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire_connection(&self, mode: AccessMode) -> Result<PooledConnection, BoltError>;

    /// Opens (and releases) a connection to prove the database is reachable.
    async fn verify_connectivity(&self) -> Result<(), BoltError>;

    async fn close(&self);
}

/// Every connection goes to one address.
pub struct DirectConnectionProvider {
    address: BoltAddress,
    pool: Arc<ConnectionPool>,
}

impl DirectConnectionProvider {
    pub fn new(address: BoltAddress, pool: Arc<ConnectionPool>) -> Self {
        Self { address, pool }
    }

    pub fn address(&self) -> &BoltAddress {
        &self.address
    }
}

#[async_trait]
impl ConnectionProvider for DirectConnectionProvider {
    async fn acquire_connection(&self, _mode: AccessMode) -> Result<PooledConnection, BoltError> {
        self.pool.acquire(&self.address).await
    }

    async fn verify_connectivity(&self) -> Result<(), BoltError> {
        self.pool.acquire(&self.address).await.map(PooledConnection::release)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
