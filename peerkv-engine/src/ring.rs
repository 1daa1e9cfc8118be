//! # Consistent Hash Ring
//!
//! Hash ring with virtual replicas. Each node key is registered `replicas`
//! times as `hash("{i}{key}")`, which spreads nodes around the ring without
//! needing a second hash function. Lookup is a binary search over a sorted
//! slot vector with wraparound, no allocations on the hot path.

use ahash::RandomState;
use hashbrown::HashMap;

/// Ring hash function over raw bytes.
pub type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Default number of virtual replicas per node.
pub const DEFAULT_REPLICAS: usize = 50;

/// Consistent-hash router over node keys.
pub struct HashRing {
    /// Virtual replicas per registered node.
    replicas: usize,
    hash: HashFn,
    /// Sorted virtual slot positions.
    slots: Vec<u32>,
    /// Slot position -> owning node key.
    nodes: HashMap<u32, String, RandomState>,
}

impl HashRing {
    /// Creates a ring; `hash` defaults to CRC32/IEEE.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        HashRing {
            replicas,
            hash: hash.unwrap_or_else(|| Box::new(crc32fast::hash)),
            slots: Vec::new(),
            nodes: HashMap::default(),
        }
    }

    /// Registers node keys, adding `replicas` virtual slots per key.
    pub fn register<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            for i in 0..self.replicas {
                let slot = (self.hash)(format!("{i}{key}").as_bytes());
                self.slots.push(slot);
                self.nodes.insert(slot, key.to_string());
            }
        }
        self.slots.sort_unstable();
    }

    /// Returns the node owning `key`, or `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.slots.is_empty() {
            return None;
        }
        let target = (self.hash)(key.as_bytes());
        let idx = self.slots.partition_point(|&slot| slot < target);
        let slot = self.slots[idx % self.slots.len()];
        self.nodes.get(&slot).map(String::as_str)
    }

    /// Unregisters node keys and rebuilds the slot vector.
    pub fn remove<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            for i in 0..self.replicas {
                let slot = (self.hash)(format!("{i}{key}").as_bytes());
                self.nodes.remove(&slot);
            }
        }
        self.slots = self.nodes.keys().copied().collect();
        self.slots.sort_unstable();
    }

    /// Returns true when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use super::*;

    /// Hash that parses decimal strings, making slot positions predictable.
    fn numeric_hash() -> HashFn {
        Box::new(|data| {
            std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(0)
        })
    }

    #[test]
    fn routes_keys_to_successor_slot_with_wraparound() {
        let mut ring = HashRing::new(3, Some(numeric_hash()));
        // Nodes 2, 4, 6 produce virtual slots 2/12/22, 4/14/24, 6/16/26.
        ring.register(["6", "4", "2"]);

        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")];
        for (key, owner) in cases {
            assert_eq!(ring.get(key), Some(owner), "key {key}");
        }
    }

    #[test]
    fn newly_registered_node_takes_over_its_range() {
        let mut ring = HashRing::new(3, Some(numeric_hash()));
        ring.register(["6", "4", "2"]);
        assert_eq!(ring.get("27"), Some("2"));

        // Node 8 adds slots 8/18/28, capturing key 27.
        ring.register(["8"]);
        assert_eq!(ring.get("27"), Some("8"));
    }

    #[test]
    fn remove_rebuilds_the_ring() {
        let mut ring = HashRing::new(3, Some(numeric_hash()));
        ring.register(["6", "4", "2"]);

        ring.remove(["2"]);
        assert_eq!(ring.get("2"), Some("4"));
        assert_eq!(ring.get("27"), Some("4"));

        ring.remove(["4", "6"]);
        assert!(ring.is_empty());
        assert_eq!(ring.get("2"), None);
    }

    #[test]
    fn empty_ring_elects_nobody() {
        let ring = HashRing::new(DEFAULT_REPLICAS, None);
        assert!(ring.is_empty());
        assert_eq!(ring.get("anything"), None);
    }

    #[test]
    fn default_hash_is_deterministic() {
        let mut a = HashRing::new(DEFAULT_REPLICAS, None);
        let mut b = HashRing::new(DEFAULT_REPLICAS, None);
        a.register(["10.0.0.1:7000", "10.0.0.2:7000"]);
        b.register(["10.0.0.1:7000", "10.0.0.2:7000"]);

        for i in 0..64 {
            let key = format!("key-{i}");
            assert_eq!(a.get(&key), b.get(&key));
        }
    }

    #[test]
    fn replicas_spread_keys_across_nodes() {
        let mut ring = HashRing::new(DEFAULT_REPLICAS, None);
        let nodes = ["10.0.0.1:7000", "10.0.0.2:7000", "10.0.0.3:7000"];
        ring.register(nodes);

        let mut shares: StdHashMap<String, usize> = StdHashMap::new();
        for i in 0..3000 {
            let owner = ring.get(&format!("key-{i}")).unwrap();
            *shares.entry(owner.to_string()).or_default() += 1;
        }

        // With 50 replicas each node should own a visible share.
        for node in nodes {
            assert!(shares.get(node).copied().unwrap_or(0) > 300, "{shares:?}");
        }
        assert_eq!(shares.values().sum::<usize>(), 3000);
    }
}
