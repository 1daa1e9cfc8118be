//! # Error Taxonomy
//!
//! One shared error type for the cache core and both transports, grouped by
//! kind rather than by layer so callers can route on handling policy:
//! peer-layer failures degrade to a local load, origin failures surface (or
//! become negative cache entries), configuration mistakes fail fast.
//!
//! The enum is `Clone` so single-flight waiters can share the leader's
//! failure; IO errors are wrapped in `Arc` to keep that cheap.

use std::sync::Arc;

use thiserror::Error;

/// Result alias used across the workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache core and its transports.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Caller passed an unusable argument (empty key, malformed address).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested group does not exist on the serving node.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Network, dial, timeout, or pool failure while talking to a peer.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    /// A peer answered with a value already past its deadline.
    #[error("peer returned an expired value")]
    Expired,

    /// The origin loader failed to produce a value.
    #[error("origin load failed: {0}")]
    Origin(String),

    /// Wire framing violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying IO failure.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Arc::new(err))
    }
}
