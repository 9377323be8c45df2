//! Cached cluster topology.

use std::collections::HashSet;
use std::time::Instant;

use super::discovery::ClusterComposition;
use crate::driver::BoltAddress;
use crate::session::AccessMode;

/// Routers, readers and writers of a cluster, valid until `expires_at`.
///
/// The lists change only through [`update`](Self::update) (a discovery
/// result) or [`forget`](Self::forget)/[`forget_writer`](Self::forget_writer)
/// (a failure against an address).
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routers: Vec<BoltAddress>,
    readers: Vec<BoltAddress>,
    writers: Vec<BoltAddress>,
    expires_at: Instant,
    next_reader: usize,
    next_writer: usize,
}

impl RoutingTable {
    /// An already expired table knowing only the seed routers.
    pub fn new(routers: Vec<BoltAddress>) -> Self {
        Self {
            routers,
            readers: Vec::new(),
            writers: Vec::new(),
            expires_at: Instant::now(),
            next_reader: 0,
            next_writer: 0,
        }
    }

    pub fn routers(&self) -> &[BoltAddress] {
        &self.routers
    }

    pub fn readers(&self) -> &[BoltAddress] {
        &self.readers
    }

    pub fn writers(&self) -> &[BoltAddress] {
        &self.writers
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the table must be refreshed before serving `mode`: it has
    /// expired, or there is nobody left to ask or to serve the request.
    pub fn is_stale_for(&self, mode: AccessMode) -> bool {
        Instant::now() >= self.expires_at
            || self.routers.is_empty()
            || match mode {
                AccessMode::Read => self.readers.is_empty(),
                AccessMode::Write => self.writers.is_empty(),
            }
    }

    /// Replaces the topology. A round-robin cursor restarts only if its
    /// list actually changed.
    pub fn update(&mut self, composition: ClusterComposition) {
        if composition.readers != self.readers {
            self.next_reader = 0;
        }
        if composition.writers != self.writers {
            self.next_writer = 0;
        }
        self.routers = composition.routers;
        self.readers = composition.readers;
        self.writers = composition.writers;
        self.expires_at = composition.expires_at;
    }

    /// The next address for `mode`, round-robin.
    pub fn address_for(&mut self, mode: AccessMode) -> Option<BoltAddress> {
        let (list, cursor) = match mode {
            AccessMode::Read => (&self.readers, &mut self.next_reader),
            AccessMode::Write => (&self.writers, &mut self.next_writer),
        };
        if list.is_empty() {
            return None;
        }
        let address = list[*cursor % list.len()].clone();
        *cursor = (*cursor + 1) % list.len();
        Some(address)
    }

    /// Drops an unreachable server from the readers and writers. It stays a
    /// router candidate: discovery will find out whether it is back.
    pub fn forget(&mut self, address: &BoltAddress) {
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// Drops a server that refused a write because it is no longer the
    /// leader.
    pub fn forget_writer(&mut self, address: &BoltAddress) {
        self.writers.retain(|a| a != address);
    }

    /// Every address the table mentions.
    pub fn servers(&self) -> HashSet<BoltAddress> {
        self.routers
            .iter()
            .chain(&self.readers)
            .chain(&self.writers)
            .cloned()
            .collect()
    }
}
