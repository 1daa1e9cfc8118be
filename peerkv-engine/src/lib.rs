//! # PeerKV Engine
//!
//! The cache core: a TTL-aware byte-budgeted LRU store, its concurrency
//! shard, a single-flight load coalescer, a consistent-hash ring with
//! virtual replicas, the peer router, and the group facade tying them to an
//! origin loader. Transports live in the client and server crates; the core
//! only sees them through the `Fetcher` and `PeerPicker` traits.

pub mod directory;
pub mod expiry;
pub mod group;
pub mod lru;
pub mod peers;
pub mod ring;
pub mod router;
pub mod shard;
pub mod singleflight;

pub use directory::GroupDirectory;
pub use group::Group;
pub use peers::{Fetcher, Getter, PeerPicker};
pub use ring::{HashRing, DEFAULT_REPLICAS};
pub use router::{Connector, PeerRouter};
pub use shard::CacheShard;
pub use singleflight::Flight;

// Re-export the shared types callers need alongside the engine.
pub use peerkv_common::{ByteView, CacheError, CacheResult};
