//! # Peer Router
//!
//! Maps keys to their owner peer through the consistent-hash ring and hands
//! out the cached fetch client for remote owners. Clients are produced by an
//! injected connector so the transport crate stays out of the core.
//!
//! `set_peers` is a replace operation: it validates every address, then
//! rebuilds the ring and client map from scratch. Malformed addresses are a
//! programmer error and abort immediately.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

use peerkv_common::valid_peer_addr;

use crate::peers::{Fetcher, PeerPicker};
use crate::ring::HashRing;

/// Builds a fetch client for a validated peer address.
pub type Connector = Box<dyn Fn(&str) -> Arc<dyn Fetcher> + Send + Sync>;

struct RouterInner {
    ring: HashRing,
    clients: HashMap<String, Arc<dyn Fetcher>, RandomState>,
}

/// Key -> owner-peer router with a cached client per remote peer.
pub struct PeerRouter {
    self_addr: String,
    replicas: usize,
    connector: Connector,
    /// One lock covers ring and client map; election is exclusive but short.
    inner: Mutex<RouterInner>,
}

impl PeerRouter {
    /// Creates a router for this node's own address.
    ///
    /// Panics when `self_addr` is malformed; addresses are validated at
    /// configuration time, not on the request path.
    pub fn new(self_addr: impl Into<String>, replicas: usize, connector: Connector) -> Self {
        let self_addr = self_addr.into();
        if !valid_peer_addr(&self_addr) {
            panic!("invalid peer address {self_addr:?}, expected host:port");
        }
        PeerRouter {
            self_addr,
            replicas,
            connector,
            inner: Mutex::new(RouterInner {
                ring: HashRing::new(replicas, None),
                clients: HashMap::default(),
            }),
        }
    }

    /// This node's own address.
    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Replaces the peer set, rebuilding the ring and client map.
    ///
    /// Panics on a malformed address. Idempotent for an unchanged peer set:
    /// key ownership only moves when membership changes.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addrs: Vec<String> = peers.into_iter().map(|a| a.as_ref().to_string()).collect();
        for addr in &addrs {
            if !valid_peer_addr(addr) {
                panic!("invalid peer address {addr:?}, expected host:port");
            }
        }

        let mut ring = HashRing::new(self.replicas, None);
        ring.register(&addrs);
        let mut clients: HashMap<String, Arc<dyn Fetcher>, RandomState> = HashMap::default();
        for addr in &addrs {
            if *addr != self.self_addr {
                clients.insert(addr.clone(), (self.connector)(addr));
            }
        }

        let mut inner = self.inner.lock();
        inner.ring = ring;
        inner.clients = clients;
        tracing::debug!(self_addr = %self.self_addr, peers = addrs.len(), "peer set replaced");
    }

    /// Returns the address the ring elects for `key`, if any.
    pub fn owner(&self, key: &str) -> Option<String> {
        self.inner.lock().ring.get(key).map(str::to_string)
    }

    /// Drops the ring and client map so held connections become collectable.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.ring = HashRing::new(self.replicas, None);
        inner.clients.clear();
        tracing::debug!(self_addr = %self.self_addr, "peer router shut down");
    }
}

impl PeerPicker for PeerRouter {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn Fetcher>> {
        let inner = self.inner.lock();
        let owner = inner.ring.get(key)?;
        if owner == self.self_addr {
            tracing::debug!(key, "key owned locally");
            return None;
        }
        tracing::debug!(key, peer = owner, "picked remote peer");
        inner.clients.get(owner).map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use peerkv_common::{ByteView, CacheResult};

    use super::*;

    /// Fetcher stub that records which address was asked.
    struct StubFetcher {
        addr: String,
        calls: Arc<AtomicUsize>,
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, _group: &str, key: &str) -> CacheResult<ByteView> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ByteView::new(format!("{}:{key}", self.addr).into_bytes()))
        }
    }

    fn stub_connector(calls: Arc<AtomicUsize>) -> Connector {
        Box::new(move |addr| {
            Arc::new(StubFetcher {
                addr: addr.to_string(),
                calls: Arc::clone(&calls),
            })
        })
    }

    fn counting_router(self_addr: &str) -> (PeerRouter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = PeerRouter::new(self_addr, 50, stub_connector(Arc::clone(&calls)));
        (router, calls)
    }

    #[test]
    fn empty_router_serves_everything_locally() {
        let (router, _) = counting_router("127.0.0.1:7001");
        assert!(router.pick_peer("k").is_none());
        assert!(router.owner("k").is_none());
    }

    #[test]
    fn single_peer_cluster_is_always_local() {
        let (router, _) = counting_router("127.0.0.1:7001");
        router.set_peers(["127.0.0.1:7001"]);
        for i in 0..32 {
            assert!(router.pick_peer(&format!("k{i}")).is_none());
        }
    }

    #[test]
    fn remote_owner_yields_its_client() {
        let (router, calls) = counting_router("127.0.0.1:7001");
        let peers = ["127.0.0.1:7001", "127.0.0.1:7002", "127.0.0.1:7003"];
        router.set_peers(peers);

        let mut remote = 0;
        for i in 0..128 {
            let key = format!("k{i}");
            match router.pick_peer(&key) {
                Some(fetcher) => {
                    let owner = router.owner(&key).unwrap();
                    assert_ne!(owner, "127.0.0.1:7001");
                    let value = fetcher.fetch("g", &key).unwrap();
                    assert!(value.as_slice().starts_with(owner.as_bytes()));
                    remote += 1;
                }
                None => assert_eq!(router.owner(&key).as_deref(), Some("127.0.0.1:7001")),
            }
        }
        assert!(remote > 0);
        assert_eq!(calls.load(Ordering::SeqCst), remote);
    }

    #[test]
    fn ownership_is_stable_under_idempotent_set_peers() {
        let (router, _) = counting_router("127.0.0.1:7001");
        let peers = ["127.0.0.1:7001", "127.0.0.1:7002"];
        router.set_peers(peers);
        let before: Vec<Option<String>> = (0..64).map(|i| router.owner(&format!("k{i}"))).collect();

        router.set_peers(peers);
        let after: Vec<Option<String>> = (0..64).map(|i| router.owner(&format!("k{i}"))).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn shutdown_clears_ring_and_clients() {
        let (router, _) = counting_router("127.0.0.1:7001");
        router.set_peers(["127.0.0.1:7001", "127.0.0.1:7002"]);
        router.shutdown();
        assert!(router.pick_peer("k").is_none());
        assert!(router.owner("k").is_none());
    }

    #[test]
    #[should_panic(expected = "invalid peer address")]
    fn malformed_peer_address_aborts() {
        let (router, _) = counting_router("127.0.0.1:7001");
        router.set_peers(["not-an-address"]);
    }

    #[test]
    #[should_panic(expected = "invalid peer address")]
    fn malformed_self_address_aborts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = PeerRouter::new("example.com:80", 50, stub_connector(calls));
    }
}
