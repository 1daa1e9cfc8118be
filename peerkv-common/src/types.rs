//! # Cache Value View
//!
//! `ByteView` wraps a value payload together with its optional expiry
//! deadline. The payload is a `bytes::Bytes` handle, so clones share the
//! underlying buffer and no holder can mutate it after construction; the
//! store hands out views, never aliases into its own state.
//!
//! Deadlines travel on the wire as total nanoseconds since the Unix epoch
//! (`0` = never expires). The decoder accepts any `i64` and reconstructs the
//! instant deterministically via a euclidean split into seconds and nanos.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Immutable value container: payload bytes plus an optional expiry instant.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteView {
    payload: Bytes,
    expire: Option<SystemTime>,
}

impl ByteView {
    /// Builds a view that never expires.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        ByteView {
            payload: payload.into(),
            expire: None,
        }
    }

    /// Builds a view expiring at the given instant.
    pub fn with_expire(payload: impl Into<Bytes>, expire: SystemTime) -> Self {
        ByteView {
            payload: payload.into(),
            expire: Some(expire),
        }
    }

    /// Builds an empty view expiring at the given instant.
    ///
    /// Used for negative cache entries covering failed origin loads.
    pub fn empty_with_expire(expire: SystemTime) -> Self {
        ByteView {
            payload: Bytes::new(),
            expire: Some(expire),
        }
    }

    /// Reconstructs a view from wire fields (`0` nanos = no expiry).
    pub fn from_wire(payload: impl Into<Bytes>, expire_nanos: i64) -> Self {
        ByteView {
            payload: payload.into(),
            expire: (expire_nanos != 0).then(|| system_time_from_nanos(expire_nanos)),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrows the payload.
    pub fn as_slice(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a copy of the payload the caller may freely mutate.
    pub fn to_vec(&self) -> Vec<u8> {
        self.payload.to_vec()
    }

    /// Returns the expiry instant, if any.
    pub fn expire(&self) -> Option<SystemTime> {
        self.expire
    }

    /// Returns true when the deadline has passed at `now`.
    ///
    /// A view without a deadline never expires.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.expire {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    /// Expiry as total nanoseconds since the Unix epoch (`0` = no expiry).
    pub fn expire_unix_nanos(&self) -> i64 {
        self.expire.map_or(0, unix_nanos)
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() <= 32 {
            write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.payload))
        } else {
            write!(f, "ByteView({}B)", self.len())
        }
    }
}

/// Converts an instant to total nanoseconds since the Unix epoch.
///
/// Instants before the epoch map to negative values; out-of-range instants
/// saturate at the `i64` bounds.
pub fn unix_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(err) => i64::try_from(err.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

fn system_time_from_nanos(nanos: i64) -> SystemTime {
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let subsec = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, subsec)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .map(|base| base + Duration::new(0, subsec))
            .unwrap_or(UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_copy_does_not_alias_the_view() {
        let view = ByteView::new(b"630".as_slice());
        let mut copy = view.to_vec();
        copy[0] = b'X';
        assert_eq!(view.as_slice(), b"630");
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn zero_nanos_means_no_expiry() {
        let view = ByteView::from_wire(Vec::from(&b"v"[..]), 0);
        assert!(view.expire().is_none());
        assert_eq!(view.expire_unix_nanos(), 0);
        assert!(!view.is_expired(SystemTime::now()));
    }

    #[test]
    fn expiry_roundtrips_through_wire_nanos() {
        let deadline = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let view = ByteView::with_expire(Vec::from(&b"v"[..]), deadline);
        let nanos = view.expire_unix_nanos();
        let decoded = ByteView::from_wire(Vec::from(&b"v"[..]), nanos);
        assert_eq!(decoded.expire(), Some(deadline));
    }

    #[test]
    fn negative_nanos_decode_deterministically() {
        let a = ByteView::from_wire(Bytes::new(), -1_500_000_000);
        let b = ByteView::from_wire(Bytes::new(), -1_500_000_000);
        assert_eq!(a.expire(), b.expire());
        assert!(a.is_expired(SystemTime::now()));
    }

    #[test]
    fn deadline_in_past_is_expired() {
        let view = ByteView::with_expire(Bytes::new(), UNIX_EPOCH + Duration::from_secs(1));
        assert!(view.is_expired(SystemTime::now()));
        let future = SystemTime::now() + Duration::from_secs(60);
        let fresh = ByteView::with_expire(Bytes::new(), future);
        assert!(!fresh.is_expired(SystemTime::now()));
    }
}
