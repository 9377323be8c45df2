//! Cluster routing: a routing table refreshed through discovery, and a
//! connection provider that sends reads to readers and writes to writers.

mod discovery;
mod load_balancer;
mod table;

pub use discovery::{ClusterComposition, Rediscovery};
pub use load_balancer::{LoadBalancer, RoutingTableHandle};
pub use table::RoutingTable;
