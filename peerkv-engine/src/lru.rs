//! # TTL-Aware LRU Store
//!
//! Byte-budgeted LRU with deadline-indexed expiry pruning. Lookups run
//! concurrently through `&self`; mutations are exclusive, and `CacheShard`
//! maps the two onto its reader-writer lock.
//!
//! ## Design Principles
//!
//! 1. **Index-Based Intrusive List**: Nodes live in a dense arena and link by
//!    index, giving O(1) eviction without heap pointers.
//! 2. **Shared Key Buffers**: The key `Arc<str>` is shared between the map,
//!    the node, and the expiry index to avoid duplicate allocations.
//! 3. **Deferred Promotion**: A lookup records recency in an atomic stamp and
//!    a pending queue instead of relinking the list. Writers settle the queue
//!    (relink in stamp order) before evicting, so eviction order stays exact
//!    while lookups never take the exclusive side of the shard lock.
//! 4. **Opportunistic Expiry**: Writes prune a bounded batch of expired
//!    entries; a lookup reports the one expired entry it touched so the
//!    caller can reclaim it exclusively. No background timer.
//! 5. **Byte-Based Budget**: Eviction is driven by `key.len() + value.len()`
//!    occupancy, not entry count.
//!
//! ## Structure Overview
//!
//! ```text
//! LruStore
//!   ├── map: HashMap<Arc<str>, usize>      key -> node index
//!   ├── nodes: Vec<Option<Node>>           dense arena, index-linked LRU
//!   │     └── Node { linked_at, last_used: AtomicU64, ... }
//!   ├── free: Vec<usize>                   slot recycler
//!   ├── head/tail                          head = LRU, tail = MRU
//!   ├── tick: AtomicU64                    monotone recency clock
//!   ├── pending: Mutex<Vec<usize>>         lookups awaiting promotion
//!   └── expiry: ExpiryIndex                (deadline, key), earliest first
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

use peerkv_common::{unix_nanos, ByteView};

use crate::expiry::ExpiryIndex;

/// Expired entries reclaimed per write, earliest deadline first.
const EXPIRE_PRUNE_BATCH: usize = 10;

/// Callback invoked on every removal path except overwrite.
pub type EvictionHook = Box<dyn Fn(&str, &ByteView) + Send + Sync>;

/// Outcome of a shared-state lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Live entry; recency was recorded.
    Hit(ByteView),
    /// Key absent.
    Miss,
    /// Entry present but past its deadline; reclaim it under exclusive
    /// access.
    Expired,
}

/// Internal node representing a single key/value entry.
#[derive(Debug)]
struct Node {
    // Shared key buffer; map and expiry index hold the same Arc.
    key: Arc<str>,
    value: ByteView,
    // Intrusive LRU pointers (index-based to keep nodes packed).
    prev: Option<usize>,
    next: Option<usize>,
    // Recency stamp the node's list position reflects.
    linked_at: u64,
    // Latest recency stamp, written by lookups.
    last_used: AtomicU64,
}

impl Node {
    /// True when a lookup touched the node since it was last (re)linked.
    fn touched(&self) -> bool {
        self.last_used.load(Ordering::Relaxed) > self.linked_at
    }
}

/// Bounded byte-budget LRU with TTL-aware reads and expiry pruning.
pub struct LruStore {
    /// Byte budget; 0 disables budget eviction and opportunistic pruning.
    max_bytes: usize,
    /// Current occupancy: sum of `key.len() + value.len()` over live entries.
    used_bytes: usize,
    /// Key -> node index for O(1) lookup.
    map: HashMap<Arc<str>, usize, RandomState>,
    /// Dense node storage.
    nodes: Vec<Option<Node>>,
    /// Free-list for recycling node slots.
    free: Vec<usize>,
    /// LRU head (oldest) and tail (most recent).
    head: Option<usize>,
    tail: Option<usize>,
    /// Monotone clock for recency stamps.
    tick: AtomicU64,
    /// Node indices stamped by lookups, promoted at the next write.
    pending: Mutex<Vec<usize>>,
    /// Keys with a real deadline, earliest first.
    expiry: ExpiryIndex,
    on_evicted: Option<EvictionHook>,
}

impl LruStore {
    /// Creates a store with the given byte budget (0 = unbounded).
    pub fn new(max_bytes: usize, on_evicted: Option<EvictionHook>) -> Self {
        LruStore {
            max_bytes,
            used_bytes: 0,
            map: HashMap::default(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            tick: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            expiry: ExpiryIndex::new(),
            on_evicted,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Current byte occupancy.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Configured byte budget.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Shared-state lookup: records recency without touching the list.
    ///
    /// Safe to call from many threads at once. An expired entry is reported
    /// as [`Lookup::Expired`] and left in place; the caller reclaims it with
    /// exclusive access (`get` or `remove`).
    pub fn lookup(&self, key: &str) -> Lookup {
        let Some(&idx) = self.map.get(key) else {
            return Lookup::Miss;
        };
        let Some(node) = self.nodes[idx].as_ref() else {
            return Lookup::Miss;
        };
        if node.value.is_expired(SystemTime::now()) {
            return Lookup::Expired;
        }
        node.last_used.store(self.next_tick(), Ordering::Relaxed);
        self.pending.lock().push(idx);
        Lookup::Hit(node.value.clone())
    }

    /// Exclusive lookup: as [`lookup`](Self::lookup), but an entry past its
    /// deadline is removed in full (budget, index, callback).
    pub fn get(&mut self, key: &str) -> Option<ByteView> {
        match self.lookup(key) {
            Lookup::Hit(view) => Some(view),
            Lookup::Miss => None,
            Lookup::Expired => {
                self.remove(key);
                None
            }
        }
    }

    /// Inserts or overwrites an entry, then reclaims expired and over-budget
    /// entries.
    ///
    /// Overwrite adjusts occupancy in place and does not fire the eviction
    /// callback.
    pub fn add(&mut self, key: &str, value: ByteView) {
        self.settle_recency();
        let expire_nanos = value.expire_unix_nanos();
        let stamp = self.next_tick();

        let key_arc = if let Some(&idx) = self.map.get(key) {
            let node = self.nodes[idx].as_mut().expect("indexed node exists");
            self.used_bytes -= node.value.len();
            self.used_bytes += value.len();
            node.value = value;
            *node.last_used.get_mut() = stamp;
            node.linked_at = stamp;
            let key_arc = Arc::clone(&node.key);
            self.relink_back(idx);
            key_arc
        } else {
            let key_arc: Arc<str> = Arc::from(key);
            self.used_bytes += key.len() + value.len();
            self.insert_new(Arc::clone(&key_arc), value, stamp);
            key_arc
        };

        if expire_nanos != 0 {
            self.expiry.add(key_arc, expire_nanos);
        } else {
            self.expiry.remove(&key_arc);
        }

        if self.max_bytes > 0 {
            self.prune_expired(EXPIRE_PRUNE_BATCH, SystemTime::now());
        }
        // The last entry is never evicted for budget pressure, so a value
        // larger than the whole budget still makes progress.
        while self.max_bytes > 0 && self.used_bytes > self.max_bytes && self.len() > 1 {
            self.remove_oldest();
        }
    }

    /// Removes a key. Returns true when a live entry was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.map.get(key) {
            Some(&idx) => self.remove_idx(idx),
            None => false,
        }
    }

    /// Evicts the least-recently-used entry.
    pub fn remove_oldest(&mut self) -> bool {
        self.settle_recency();
        match self.head {
            Some(idx) => self.remove_idx(idx),
            None => false,
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Replays pending lookup stamps onto the list, oldest stamp first.
    ///
    /// All pending stamps are newer than every `linked_at` (stamps are
    /// monotone and every write settles before stamping), so relinking in
    /// ascending stamp order restores the exact recency order.
    fn settle_recency(&mut self) {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }
        pending.sort_unstable();
        pending.dedup();

        let mut touched: Vec<(u64, usize)> = pending
            .into_iter()
            .filter_map(|idx| {
                // Slots recycled since the lookup carry a fresh stamp pair
                // and fall out through the touched() check.
                let node = self.nodes.get(idx)?.as_ref()?;
                node.touched()
                    .then(|| (node.last_used.load(Ordering::Relaxed), idx))
            })
            .collect();
        touched.sort_unstable();

        for (stamp, idx) in touched {
            self.relink_back(idx);
            if let Some(node) = self.nodes[idx].as_mut() {
                node.linked_at = stamp;
            }
        }
    }

    /// Reclaims up to `limit` entries whose deadline is at or before `now`,
    /// earliest first. Stops as soon as the earliest deadline is still ahead.
    fn prune_expired(&mut self, limit: usize, now: SystemTime) {
        let now_nanos = unix_nanos(now);
        for _ in 0..limit {
            let Some((key, deadline)) = self.expiry.peek_earliest() else {
                break;
            };
            if deadline > now_nanos {
                break;
            }
            self.remove(&key);
        }
    }

    /// Removes a node by index: detaches the LRU link, drops the map and
    /// expiry entries, releases the slot, and fires the eviction callback.
    fn remove_idx(&mut self, idx: usize) -> bool {
        if self.nodes.get(idx).map_or(true, Option::is_none) {
            return false;
        }
        self.lru_remove(idx);
        let node = self.nodes[idx].take().expect("detached node exists");
        self.map.remove(node.key.as_ref());
        if node.value.expire().is_some() {
            self.expiry.remove(&node.key);
        }
        self.free.push(idx);
        self.used_bytes -= node.key.len() + node.value.len();
        if let Some(hook) = &self.on_evicted {
            hook(&node.key, &node.value);
        }
        true
    }

    /// Inserts a new node at the MRU end and returns its slot index.
    fn insert_new(&mut self, key: Arc<str>, value: ByteView, stamp: u64) -> usize {
        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });

        self.nodes[idx] = Some(Node {
            key: Arc::clone(&key),
            value,
            prev: None,
            next: None,
            linked_at: stamp,
            last_used: AtomicU64::new(stamp),
        });
        self.lru_push_back(idx);
        self.map.insert(key, idx);
        idx
    }

    /// Detaches `idx` from the LRU list.
    fn lru_remove(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node exists");
            (node.prev, node.next)
        };

        if let Some(prev_idx) = prev {
            if let Some(prev_node) = self.nodes[prev_idx].as_mut() {
                prev_node.next = next;
            }
        } else {
            self.head = next;
        }

        if let Some(next_idx) = next {
            if let Some(next_node) = self.nodes[next_idx].as_mut() {
                next_node.prev = prev;
            }
        } else {
            self.tail = prev;
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    /// Appends `idx` at the MRU end.
    fn lru_push_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }

        if let Some(tail_idx) = tail {
            if let Some(tail_node) = self.nodes[tail_idx].as_mut() {
                tail_node.next = Some(idx);
            }
        } else {
            self.head = Some(idx);
        }

        self.tail = Some(idx);
    }

    /// Moves `idx` to the MRU end.
    fn relink_back(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.lru_remove(idx);
        self.lru_push_back(idx);
    }
}

impl std::fmt::Debug for LruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("len", &self.len())
            .field("used_bytes", &self.used_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
