//! # Peer Fetch Client
//!
//! Purpose: Expose a compact, blocking `Fetcher` for pulling values from a
//! remote peer over the fetch protocol.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling and framing details.
//! 2. **Bounded Deadlines**: Every fetch carries the configured read timeout.
//! 3. **Stale Rejection**: A response already past its deadline is an error,
//!    never a value.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use peerkv_common::protocol::{error_for, STATUS_OK};
use peerkv_common::{ByteView, CacheError, CacheResult};
use peerkv_engine::{Connector, Fetcher};

use crate::pool::{ConnectionPool, PoolConfig};

/// Default per-fetch deadline.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the fetch client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer address, e.g. "127.0.0.1:6324".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Per-fetch read deadline.
    pub read_timeout: Option<Duration>,
    /// TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Default configuration for the given peer address.
    pub fn for_addr(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            max_idle: 8,
            max_total: 16,
            read_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            write_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            connect_timeout: Some(DEFAULT_FETCH_TIMEOUT),
        }
    }
}

/// Blocking fetch client for one remote peer.
pub struct Client {
    addr: String,
    pool: ConnectionPool,
}

impl Client {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::for_addr(addr))
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        let addr = config.addr.clone();
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        });
        Client { addr, pool }
    }

    /// The peer this client talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Fetcher for Client {
    /// Fetches `group`/`key` from the peer.
    ///
    /// IO failures surface as `PeerUnavailable` so the group degrades to its
    /// local path; a value already past its deadline is rejected as stale.
    fn fetch(&self, group: &str, key: &str) -> CacheResult<ByteView> {
        let mut conn = self.pool.acquire()?;
        let response = conn.fetch(group, key).map_err(|err| match err {
            CacheError::Io(inner) => {
                CacheError::PeerUnavailable(format!("peer {}: {inner}", self.addr))
            }
            other => other,
        })?;

        if response.status != STATUS_OK {
            let detail = String::from_utf8_lossy(&response.value).into_owned();
            tracing::debug!(peer = %self.addr, group, key, status = response.status, "peer fetch refused");
            return Err(error_for(response.status, detail));
        }

        let view = ByteView::from_wire(response.value, response.expire_nanos);
        if view.is_expired(SystemTime::now()) {
            return Err(CacheError::Expired);
        }
        Ok(view)
    }
}

/// Connector producing default-configured clients, for `PeerRouter`.
pub fn connector() -> Connector {
    Box::new(|addr| Arc::new(Client::connect(addr)))
}

/// Connector applying a config template to each peer address.
pub fn connector_with(template: ClientConfig) -> Connector {
    Box::new(move |addr| {
        let mut config = template.clone();
        config.addr = addr.to_string();
        Arc::new(Client::with_config(config))
    })
}
