//! PeerKV node bootstrap.
//!
//! Wires a demo score group, the peer router, the local registry, and the
//! fetch server from an optional JSON config:
//!
//! ```text
//! peerkv-server [config.json]
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use peerkv_client::connector;
use peerkv_common::{ByteView, CacheError, CacheResult};
use peerkv_engine::{GroupDirectory, PeerRouter};
use peerkv_server::{CacheServer, LocalRegistry, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let directory = Arc::new(GroupDirectory::new());
    let scores: HashMap<String, String> = [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let group = directory.create_group(
        "scores",
        config.cache_bytes,
        move |key: &str| -> CacheResult<ByteView> {
            tracing::info!(key, "origin lookup");
            scores
                .get(key)
                .map(|v| ByteView::new(v.clone().into_bytes()))
                .ok_or_else(|| CacheError::Origin(format!("{key} not exist")))
        },
    );
    if let Some(bytes) = config.hot_cache_bytes {
        group.set_hot_cache(bytes);
    }
    if let Some(ms) = config.empty_key_ttl_ms {
        group.set_empty_when_error(Duration::from_millis(ms));
    }

    let router = Arc::new(PeerRouter::new(
        config.addr.clone(),
        config.replicas,
        connector(),
    ));
    router.set_peers(config.peer_set());
    group.register_peer_picker(router);

    let registry = Arc::new(LocalRegistry::new());
    let server = CacheServer::new(config.addr.clone(), directory)?.with_registry(
        registry,
        config.service.clone(),
        config.lease_ttl(),
    );

    tracing::info!(addr = %config.addr, "starting peerkv node");
    server.serve().await?;
    Ok(())
}
