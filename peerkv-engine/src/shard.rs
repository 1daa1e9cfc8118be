//! # Cache Shard
//!
//! Concurrency-safe wrapper around `LruStore`: one reader-writer lock plus
//! lazy store creation, so a configured-but-unused cache costs nothing.
//!
//! Lookups take the shared lock; the store records recency through atomic
//! stamps, so concurrent readers never serialize against each other. Only
//! mutations (`add`, `remove`, reclaiming an expired entry a lookup found)
//! take the exclusive lock.

use parking_lot::RwLock;

use peerkv_common::ByteView;

use crate::lru::{Lookup, LruStore};

/// Lock-guarded, lazily initialized LRU store.
pub struct CacheShard {
    /// Byte budget handed to the store on first write.
    capacity: usize,
    store: RwLock<Option<LruStore>>,
}

impl CacheShard {
    /// Creates a shard whose store allocates on first `add`.
    pub fn new(capacity: usize) -> Self {
        CacheShard {
            capacity,
            store: RwLock::new(None),
        }
    }

    /// Looks up a key under the shared lock.
    ///
    /// Misses while the store is uninitialized. An expired entry is
    /// reclaimed under the exclusive lock before reporting the miss.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        {
            let guard = self.store.read();
            match guard.as_ref()?.lookup(key) {
                Lookup::Hit(view) => return Some(view),
                Lookup::Miss => return None,
                Lookup::Expired => {}
            }
        }
        // Rare path: the lookup saw an expired entry. The exclusive get
        // re-checks, in case the entry was replaced in between.
        self.store.write().as_mut()?.get(key)
    }

    /// Inserts a value, creating the store on first use.
    pub fn add(&self, key: &str, value: ByteView) {
        let mut guard = self.store.write();
        let store = guard.get_or_insert_with(|| LruStore::new(self.capacity, None));
        store.add(key, value);
    }

    /// Removes a key if present.
    pub fn remove(&self, key: &str) {
        if let Some(store) = self.store.write().as_mut() {
            store.remove(key);
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.store.read().as_ref().map_or(0, LruStore::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte occupancy.
    pub fn used_bytes(&self) -> usize {
        self.store.read().as_ref().map_or(0, LruStore::used_bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use super::*;

    fn view(payload: &str) -> ByteView {
        ByteView::new(payload.as_bytes().to_vec())
    }

    #[test]
    fn get_misses_before_first_add() {
        let shard = CacheShard::new(1024);
        assert!(shard.get("k").is_none());
        assert_eq!(shard.len(), 0);
        assert_eq!(shard.used_bytes(), 0);
    }

    #[test]
    fn add_initializes_store_with_capacity() {
        // Budget 20 holds two 10-byte entries; the third insert evicts.
        let shard = CacheShard::new(20);
        shard.add("k1", view("12345678"));
        shard.add("k2", view("12345678"));
        shard.add("k3", view("12345678"));

        assert_eq!(shard.len(), 2);
        assert!(shard.get("k1").is_none());
        assert!(shard.get("k3").is_some());
    }

    #[test]
    fn reads_refresh_recency_for_eviction() {
        let shard = CacheShard::new(20);
        shard.add("k1", view("12345678"));
        shard.add("k2", view("12345678"));
        shard.get("k1");
        shard.add("k3", view("12345678"));

        assert!(shard.get("k2").is_none());
        assert!(shard.get("k1").is_some());
        assert!(shard.get("k3").is_some());
    }

    #[test]
    fn expired_entry_is_reclaimed_through_get() {
        let shard = CacheShard::new(1024);
        shard.add(
            "k",
            ByteView::with_expire(b"v".as_slice(), SystemTime::now() + Duration::from_millis(1)),
        );
        std::thread::sleep(Duration::from_millis(5));

        assert!(shard.get("k").is_none());
        assert_eq!(shard.len(), 0);
        assert_eq!(shard.used_bytes(), 0);
    }

    #[test]
    fn remove_is_a_noop_before_init() {
        let shard = CacheShard::new(1024);
        shard.remove("k");
        shard.add("k", view("v"));
        shard.remove("k");
        assert!(shard.get("k").is_none());
    }

    #[test]
    fn concurrent_readers_and_writers_settle() {
        let shard = Arc::new(CacheShard::new(0));
        let mut handles = Vec::new();
        for t in 0..4 {
            let shard = Arc::clone(&shard);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("k{}", (t * 50 + i) % 20);
                    shard.add(&key, ByteView::new(key.clone().into_bytes()));
                    if let Some(found) = shard.get(&key) {
                        assert_eq!(found.as_slice(), key.as_bytes());
                    }
                    std::thread::sleep(Duration::from_micros(10));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(shard.len() <= 20);
    }
}
