// peerkv-server - TCP cache server and service registry for PeerKV
//
// Serves the peer fetch protocol over tokio, announces the node in a
// lease-based registry, and keeps the peer router in sync with membership.

pub mod config;
pub mod metrics;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use metrics::{Metrics, MetricsSnapshot};
pub use registry::{
    spawn_heartbeat, spawn_peer_sync, LocalRegistry, PeerEvent, Registry, TaskHandle,
    DEFAULT_LEASE_TTL,
};
pub use server::CacheServer;
