//! Server configuration.
//!
//! JSON-backed node configuration for the bootstrap binary. Every field has
//! a default, so an empty object is a valid single-node config.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use peerkv_engine::DEFAULT_REPLICAS;

use crate::server::DEFAULT_SERVICE;

/// Node configuration for a PeerKV server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind and announce address (`host:port`).
    pub addr: String,
    /// Service name used for registry announcements.
    pub service: String,
    /// Static peer set; empty means a single-node cluster of `addr`.
    pub peers: Vec<String>,
    /// Main cache byte budget.
    pub cache_bytes: usize,
    /// Hot cache byte budget; absent disables the hot cache.
    pub hot_cache_bytes: Option<usize>,
    /// Negative-cache TTL in milliseconds; absent disables the mechanism.
    pub empty_key_ttl_ms: Option<u64>,
    /// Virtual replicas per node on the hash ring.
    pub replicas: usize,
    /// Registry lease TTL in seconds.
    pub lease_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "127.0.0.1:6324".to_string(),
            service: DEFAULT_SERVICE.to_string(),
            peers: Vec::new(),
            cache_bytes: 1 << 20,
            hot_cache_bytes: None,
            empty_key_ttl_ms: None,
            replicas: DEFAULT_REPLICAS,
            lease_ttl_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Loads a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// The peer set to route over: the configured peers, or just this node.
    pub fn peer_set(&self) -> Vec<String> {
        if self.peers.is_empty() {
            vec![self.addr.clone()]
        } else {
            self.peers.clone()
        }
    }

    /// Registry lease TTL as a duration.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}
