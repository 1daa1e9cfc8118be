// peerkv-client - Blocking peer fetch client for PeerKV
//
// Implements the engine's `Fetcher` capability over the peer fetch protocol,
// with a bounded connection pool per peer.

mod client;
mod pool;

pub use client::{connector, connector_with, Client, ClientConfig};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
