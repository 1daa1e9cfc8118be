// peerkv-common - Shared types and protocol definitions for PeerKV
//
// This crate defines the error taxonomy, the immutable value view, and the
// peer fetch wire framing shared by the engine, client, and server crates.

pub mod addr;
pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use addr::valid_peer_addr;
pub use error::{CacheError, CacheResult};
pub use types::{unix_nanos, ByteView};
