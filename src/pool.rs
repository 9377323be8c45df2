//! Per-address connection pool.
//!
//! Each address gets a bucket: a fair semaphore whose permits bound the
//! number of checked-out connections (waiters are served in arrival order)
//! and a queue of idle connections. A connection is only created when the
//! bucket has no idle one, so a bucket never holds more connections than it
//! has permits.
//!
//! The semaphore belongs to the address, not the bucket. A purged bucket's
//! checked-out connections keep their permits until released, and a bucket
//! rebuilt for the same address shares them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::connection::{Connection, Connector, FailureListener};
use crate::driver::BoltAddress;
use crate::error::BoltError;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Connections per address, idle and in use together.
    pub max_size: usize,
    pub acquisition_timeout: Duration,
    /// Idle time after which a connection is probed before reuse.
    /// `None` disables the probe.
    pub idle_time_before_test: Option<Duration>,
}

struct Bucket {
    address: BoltAddress,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    /// Set once the bucket is purged; released connections are closed
    /// instead of kept.
    retired: AtomicBool,
}

impl Bucket {
    fn release(&self, mut conn: Connection) {
        if conn.is_broken() {
            tracing::warn!(
                address = %self.address,
                connection_id = %conn.id(),
                "disposing broken connection"
            );
            return;
        }
        let pending = conn.pending();
        if pending > 0 {
            conn.mark_broken("released with unanswered requests");
            tracing::debug!(
                address = %self.address,
                connection_id = %conn.id(),
                pending,
                "disposing connection released mid-request"
            );
            return;
        }
        if self.retired.load(Ordering::Acquire) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(conn.close());
            }
            return;
        }
        conn.set_in_use(false);
        self.idle.lock().push_back(conn);
    }

    async fn drain(&self) {
        let idle: Vec<_> = self.idle.lock().drain(..).collect();
        for conn in idle {
            conn.close().await;
        }
    }
}

pub struct ConnectionPool {
    connector: Connector,
    settings: PoolSettings,
    listener: Option<Arc<dyn FailureListener>>,
    buckets: Mutex<HashMap<BoltAddress, Arc<Bucket>>>,
    permits: Mutex<HashMap<BoltAddress, Arc<Semaphore>>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(connector: Connector, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            listener: None,
            buckets: Mutex::new(HashMap::new()),
            permits: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Attaches a listener to every connection this pool opens.
    pub fn with_listener(mut self, listener: Arc<dyn FailureListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn bucket(&self, address: &BoltAddress) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(address.clone()).or_insert_with(|| {
            let permits = Arc::clone(
                self.permits
                    .lock()
                    .entry(address.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.settings.max_size))),
            );
            Arc::new(Bucket {
                address: address.clone(),
                permits,
                idle: Mutex::new(VecDeque::new()),
                retired: AtomicBool::new(false),
            })
        });
        Arc::clone(bucket)
    }

    /// Hands out a connection to `address` for exclusive use.
    ///
    /// Reuses an idle connection when there is one (probing it first if it
    /// sat idle too long), otherwise opens a new one. When every permit is
    /// taken the caller waits in line; after the acquisition timeout it gets
    /// [`BoltError::ResourceExhausted`]. The liveness check runs within what
    /// is left of that timeout; an idle connection that does not answer in
    /// time is discarded like one that failed the check.
    pub async fn acquire(&self, address: &BoltAddress) -> Result<PooledConnection, BoltError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BoltError::InvalidState("connection pool is closed".into()));
        }
        let bucket = self.bucket(address);
        let timeout = self.settings.acquisition_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let permit = tokio::time::timeout_at(deadline, Arc::clone(&bucket.permits).acquire_owned())
            .await
            .map_err(|_| {
                BoltError::ResourceExhausted(format!(
                    "unable to acquire connection from the pool within {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|_| BoltError::InvalidState("connection pool is closed".into()))?;

        loop {
            let idle = bucket.idle.lock().pop_back();
            let Some(mut conn) = idle else {
                let mut conn = self.connector.connect(address, self.listener.clone()).await?;
                conn.set_in_use(true);
                return Ok(PooledConnection::new(conn, bucket, permit));
            };

            if conn.is_broken() {
                tracing::debug!(%address, connection_id = %conn.id(), "dropping dead idle connection");
                continue;
            }
            if let Some(threshold) = self.settings.idle_time_before_test {
                if conn.idle_for() >= threshold {
                    let protocol = conn.protocol();
                    let probe = tokio::time::timeout_at(deadline, protocol.reset(&mut conn))
                        .await
                        .unwrap_or_else(|_| {
                            Err(BoltError::Connectivity(format!(
                                "no reply to RESET within {}ms",
                                timeout.as_millis()
                            )))
                        });
                    if let Err(e) = probe {
                        conn.mark_broken("failed liveness check");
                        tracing::warn!(
                            %address,
                            connection_id = %conn.id(),
                            error = %e,
                            "idle connection failed liveness check"
                        );
                        continue;
                    }
                }
            }
            conn.set_in_use(true);
            return Ok(PooledConnection::new(conn, bucket, permit));
        }
    }

    /// Closes idle connections to `address` and forgets the bucket.
    /// Connections still checked out are closed when released.
    pub async fn purge(&self, address: &BoltAddress) {
        let bucket = self.buckets.lock().remove(address);
        if let Some(bucket) = bucket {
            tracing::debug!(%address, "purging connection pool");
            bucket.retired.store(true, Ordering::Release);
            bucket.drain().await;
        }
    }

    /// Purges every address not in `keep`.
    pub async fn retain_all(&self, keep: &HashSet<BoltAddress>) {
        let stale: Vec<BoltAddress> = self
            .buckets
            .lock()
            .keys()
            .filter(|a| !keep.contains(*a))
            .cloned()
            .collect();
        for address in stale {
            self.purge(&address).await;
        }
    }

    pub fn has_address(&self, address: &BoltAddress) -> bool {
        self.buckets.lock().contains_key(address)
    }

    pub fn idle_count(&self, address: &BoltAddress) -> usize {
        self.buckets
            .lock()
            .get(address)
            .map_or(0, |b| b.idle.lock().len())
    }

    /// Checked-out connections, including those of a purged bucket that
    /// have not been released yet.
    pub fn in_use_count(&self, address: &BoltAddress) -> usize {
        self.permits.lock().get(address).map_or(0, |permits| {
            self.settings.max_size - permits.available_permits()
        })
    }

    /// Closes every idle connection and fails later and waiting acquires.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for permits in self.permits.lock().values() {
            permits.close();
        }
        let buckets: Vec<_> = self.buckets.lock().drain().map(|(_, b)| b).collect();
        for bucket in buckets {
            bucket.retired.store(true, Ordering::Release);
            bucket.drain().await;
        }
    }
}

/// Exclusive use of a pooled connection. Dropping it gives the connection
/// back (or disposes of it if it is no longer reusable) and frees the slot.
pub struct PooledConnection {
    conn: Option<Connection>,
    bucket: Arc<Bucket>,
    // Fields drop after `Drop::drop`, so the permit is freed only once the
    // connection is back in the idle queue.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(conn: Connection, bucket: Arc<Bucket>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            bucket,
            _permit: permit,
        }
    }

    pub fn release(self) {}
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.conn).finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.bucket.release(conn);
        }
    }
}
