//! Capability traits at the seams of the cache core.
//!
//! The engine never talks to a socket or a database directly: remote peers
//! appear as `Fetcher`s, peer election as a `PeerPicker`, and the origin
//! data source as a `Getter`. Transports and data sources implement these
//! in their own crates.

use std::sync::Arc;

use peerkv_common::{ByteView, CacheResult};

/// Capability to fetch a cached value from a remote peer.
pub trait Fetcher: Send + Sync {
    /// Fetches `key` from the named group on the remote node.
    fn fetch(&self, group: &str, key: &str) -> CacheResult<ByteView>;
}

/// Capability to elect the owner peer for a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the remote owner's fetcher, or `None` when the key is served
    /// locally.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn Fetcher>>;
}

/// Origin data loader invoked on a full cache miss.
///
/// Implementations must be safe to call from multiple threads; the group's
/// single-flight guarantees at most one in-flight call per key.
pub trait Getter: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<ByteView>;
}

/// Any compatible closure is a `Getter`.
impl<F> Getter for F
where
    F: Fn(&str) -> CacheResult<ByteView> + Send + Sync,
{
    fn get(&self, key: &str) -> CacheResult<ByteView> {
        self(key)
    }
}
