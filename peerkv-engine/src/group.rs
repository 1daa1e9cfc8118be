//! # Group Facade
//!
//! A `Group` is one named cache keyspace: it composes the main shard, an
//! optional hot-key mirror, the origin loader, and the bound peer picker,
//! and enforces read-through semantics on top of them.
//!
//! Read path: main cache, hot cache, then a single-flighted load that asks
//! the owner peer first and falls back to the origin. Peer failure is
//! degradation, never an error to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use rand::Rng;

use peerkv_common::{ByteView, CacheError, CacheResult};

use crate::peers::{Getter, PeerPicker};
use crate::shard::CacheShard;
use crate::singleflight::Flight;

/// Share of peer-sourced values admitted to the local cache.
///
/// Admission is probabilistic so a burst of foreign-key reads cannot churn
/// the hot cache through its whole budget at once.
const PEER_ADMIT_PROBABILITY: f64 = 0.1;

/// Point-in-time copy of a group's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Total `get` calls with a non-empty key.
    pub gets: u64,
    /// Hits in the main cache.
    pub main_hits: u64,
    /// Hits in the hot cache.
    pub hot_hits: u64,
    /// Values served by a remote peer.
    pub peer_loads: u64,
    /// Peer fetches that failed and degraded to the local path.
    pub peer_failures: u64,
    /// Values loaded from the origin.
    pub local_loads: u64,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    main_hits: AtomicU64,
    hot_hits: AtomicU64,
    peer_loads: AtomicU64,
    peer_failures: AtomicU64,
    local_loads: AtomicU64,
}

/// Named cache keyspace with read-through loading.
pub struct Group {
    name: String,
    getter: Box<dyn Getter>,
    main_cache: CacheShard,
    /// Mirror for values owned by other peers; absent unless configured.
    hot_cache: OnceLock<CacheShard>,
    /// Bound peer picker; binding twice is a programmer error.
    picker: OnceLock<Arc<dyn PeerPicker>>,
    loader: Flight<ByteView>,
    /// Negative-cache TTL in nanoseconds; 0 disables the mechanism.
    empty_key_nanos: AtomicU64,
    counters: Counters,
}

impl Group {
    /// Creates a group over the given origin loader and main-cache budget.
    pub fn new(name: impl Into<String>, cache_bytes: usize, getter: Box<dyn Getter>) -> Self {
        Group {
            name: name.into(),
            getter,
            main_cache: CacheShard::new(cache_bytes),
            hot_cache: OnceLock::new(),
            picker: OnceLock::new(),
            loader: Flight::new(),
            empty_key_nanos: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Group name, used in peer routing.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enables negative caching: failed origin loads are stored as an empty
    /// value for `duration`. Zero disables the mechanism.
    pub fn set_empty_when_error(&self, duration: Duration) {
        self.empty_key_nanos
            .store(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Configures the hot-key mirror for values owned by remote peers.
    ///
    /// Panics on a zero budget or when the hot cache is already configured.
    pub fn set_hot_cache(&self, cache_bytes: usize) {
        if cache_bytes == 0 {
            panic!("hot cache budget must be greater than zero");
        }
        if self.hot_cache.set(CacheShard::new(cache_bytes)).is_err() {
            panic!("hot cache configured more than once");
        }
    }

    /// Binds the peer picker. Binding twice is a programmer error.
    pub fn register_peer_picker(&self, picker: Arc<dyn PeerPicker>) {
        if self.picker.set(picker).is_err() {
            panic!("peer picker registered more than once");
        }
    }

    /// Looks up a key, loading it through the peer or origin path on a miss.
    pub fn get(&self, key: &str) -> CacheResult<ByteView> {
        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key is required".to_string()));
        }
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        if let Some(view) = self.main_cache.get(key) {
            self.counters.main_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(group = %self.name, key, "main cache hit");
            return Ok(view);
        }
        if let Some(hot) = self.hot_cache.get() {
            if let Some(view) = hot.get(key) {
                self.counters.hot_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(group = %self.name, key, "hot cache hit");
                return Ok(view);
            }
        }
        self.load(key)
    }

    /// Removes a key from the local caches. Peers are not notified.
    pub fn remove(&self, key: &str) {
        self.main_cache.remove(key);
        if let Some(hot) = self.hot_cache.get() {
            hot.remove(key);
        }
    }

    /// Snapshot of the group's counters.
    pub fn stats(&self) -> GroupStats {
        GroupStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            main_hits: self.counters.main_hits.load(Ordering::Relaxed),
            hot_hits: self.counters.hot_hits.load(Ordering::Relaxed),
            peer_loads: self.counters.peer_loads.load(Ordering::Relaxed),
            peer_failures: self.counters.peer_failures.load(Ordering::Relaxed),
            local_loads: self.counters.local_loads.load(Ordering::Relaxed),
        }
    }

    /// Single-flighted load: owner peer first, origin as the fallback.
    fn load(&self, key: &str) -> CacheResult<ByteView> {
        self.loader.fly(key, || {
            if let Some(picker) = self.picker.get() {
                if let Some(peer) = picker.pick_peer(key) {
                    match peer.fetch(&self.name, key) {
                        Ok(view) => {
                            self.counters.peer_loads.fetch_add(1, Ordering::Relaxed);
                            self.admit_peer_value(key, &view);
                            return Ok(view);
                        }
                        Err(err) => {
                            self.counters.peer_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                group = %self.name,
                                key,
                                error = %err,
                                "peer fetch failed, falling back to origin"
                            );
                        }
                    }
                }
            }
            self.get_locally(key)
        })
    }

    /// Loads from the origin and populates the main cache.
    ///
    /// With negative caching enabled, a failed load is stored as an empty
    /// view expiring after the configured TTL and returned as a normal value.
    fn get_locally(&self, key: &str) -> CacheResult<ByteView> {
        self.counters.local_loads.fetch_add(1, Ordering::Relaxed);
        let view = match self.getter.get(key) {
            Ok(view) => view,
            Err(err) => {
                let nanos = self.empty_key_nanos.load(Ordering::Relaxed);
                if nanos == 0 {
                    return Err(err);
                }
                tracing::debug!(
                    group = %self.name,
                    key,
                    error = %err,
                    "origin load failed, caching empty value"
                );
                ByteView::empty_with_expire(SystemTime::now() + Duration::from_nanos(nanos))
            }
        };
        self.main_cache.add(key, view.clone());
        Ok(view)
    }

    /// Admits a peer-sourced value to the hot cache (or the main cache when
    /// no hot cache is configured), with bounded probability.
    fn admit_peer_value(&self, key: &str, view: &ByteView) {
        if !rand::thread_rng().gen_bool(PEER_ADMIT_PROBABILITY) {
            return;
        }
        match self.hot_cache.get() {
            Some(hot) => hot.add(key, view.clone()),
            None => self.main_cache.add(key, view.clone()),
        }
    }

    #[cfg(test)]
    fn hot_cache_len(&self) -> usize {
        self.hot_cache.get().map_or(0, CacheShard::len)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("main_entries", &self.main_cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use crate::peers::Fetcher;

    use super::*;

    /// Origin stub over a fixed score table, counting invocations.
    struct ScoreGetter {
        table: HashMap<&'static str, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl ScoreGetter {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            ScoreGetter {
                table: HashMap::from([("Tom", "630"), ("Jack", "589"), ("Sam", "567")]),
                calls,
            }
        }
    }

    impl Getter for ScoreGetter {
        fn get(&self, key: &str) -> CacheResult<ByteView> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(key)
                .map(|v| ByteView::new(v.as_bytes().to_vec()))
                .ok_or_else(|| CacheError::Origin(format!("{key} not exist")))
        }
    }

    fn scores_group() -> (Group, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = Group::new(
            "scores",
            2048,
            Box::new(ScoreGetter::new(Arc::clone(&calls))),
        );
        (group, calls)
    }

    #[test]
    fn hit_skips_the_origin_on_repeat_reads() {
        let (group, calls) = scores_group();

        assert_eq!(group.get("Tom").unwrap().as_slice(), b"630");
        assert_eq!(group.get("Tom").unwrap().as_slice(), b"630");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = group.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.main_hits, 1);
        assert_eq!(stats.local_loads, 1);
    }

    #[test]
    fn empty_key_is_rejected() {
        let (group, calls) = scores_group();
        assert!(matches!(
            group.get(""),
            Err(CacheError::InvalidArgument(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_misses_invoke_origin_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow_calls = Arc::clone(&calls);
        let group = Arc::new(Group::new(
            "scores",
            2048,
            Box::new(move |key: &str| -> CacheResult<ByteView> {
                slow_calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                assert_eq!(key, "Tom");
                Ok(ByteView::new(b"630".as_slice()))
            }),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let group = Arc::clone(&group);
            handles.push(std::thread::spawn(move || group.get("Tom")));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap().as_slice(), b"630");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn origin_error_surfaces_without_negative_caching() {
        let (group, calls) = scores_group();
        assert!(matches!(group.get("Unknown"), Err(CacheError::Origin(_))));
        assert!(matches!(group.get("Unknown"), Err(CacheError::Origin(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn negative_caching_suppresses_repeat_origin_misses() {
        let (group, calls) = scores_group();
        group.set_empty_when_error(Duration::from_secs(5));

        let first = group.get("Unknown").unwrap();
        assert!(first.is_empty());
        assert!(first.expire().is_some());

        let second = group.get("Unknown").unwrap();
        assert!(second.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn negative_cache_entry_expires() {
        let (group, calls) = scores_group();
        group.set_empty_when_error(Duration::from_millis(10));

        assert!(group.get("Unknown").unwrap().is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert!(group.get("Unknown").unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_forces_a_reload() {
        let (group, calls) = scores_group();
        group.get("Tom").unwrap();
        group.remove("Tom");
        group.get("Tom").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Picker stub electing a fixed fetcher for every key.
    struct FixedPicker {
        fetcher: Arc<dyn Fetcher>,
    }

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn Fetcher>> {
            Some(Arc::clone(&self.fetcher))
        }
    }

    struct StaticFetcher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Fetcher for StaticFetcher {
        fn fetch(&self, group: &str, key: &str) -> CacheResult<ByteView> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CacheError::PeerUnavailable("dial refused".to_string()));
            }
            Ok(ByteView::new(format!("{group}/{key}").into_bytes()))
        }
    }

    #[test]
    fn remote_owner_serves_the_miss() {
        let (group, origin_calls) = scores_group();
        let peer_calls = Arc::new(AtomicUsize::new(0));
        group.register_peer_picker(Arc::new(FixedPicker {
            fetcher: Arc::new(StaticFetcher {
                calls: Arc::clone(&peer_calls),
                fail: false,
            }),
        }));

        let view = group.get("Tom").unwrap();
        assert_eq!(view.as_slice(), b"scores/Tom");
        assert_eq!(peer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(origin_calls.load(Ordering::SeqCst), 0);
        assert_eq!(group.stats().peer_loads, 1);
    }

    #[test]
    fn peer_failure_degrades_to_origin() {
        let (group, origin_calls) = scores_group();
        let peer_calls = Arc::new(AtomicUsize::new(0));
        group.register_peer_picker(Arc::new(FixedPicker {
            fetcher: Arc::new(StaticFetcher {
                calls: Arc::clone(&peer_calls),
                fail: true,
            }),
        }));

        assert_eq!(group.get("Tom").unwrap().as_slice(), b"630");
        assert_eq!(peer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(origin_calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().peer_failures, 1);
    }

    #[test]
    fn peer_values_eventually_land_in_the_hot_cache() {
        let (group, _) = scores_group();
        group.set_hot_cache(4096);
        let peer_calls = Arc::new(AtomicUsize::new(0));
        group.register_peer_picker(Arc::new(FixedPicker {
            fetcher: Arc::new(StaticFetcher {
                calls: peer_calls,
                fail: false,
            }),
        }));

        // Admission is probabilistic at 10%, so drive enough distinct keys
        // through the peer path that at least one lands.
        for i in 0..400 {
            group.get(&format!("foreign-{i}")).unwrap();
        }
        assert!(group.hot_cache_len() > 0);
        assert!(group.main_cache.is_empty());
    }

    #[test]
    #[should_panic(expected = "registered more than once")]
    fn double_picker_bind_aborts() {
        let (group, _) = scores_group();
        let fetcher: Arc<dyn Fetcher> = Arc::new(StaticFetcher {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
        });
        group.register_peer_picker(Arc::new(FixedPicker {
            fetcher: Arc::clone(&fetcher),
        }));
        group.register_peer_picker(Arc::new(FixedPicker { fetcher }));
    }

    #[test]
    #[should_panic(expected = "greater than zero")]
    fn zero_hot_cache_budget_aborts() {
        let (group, _) = scores_group();
        group.set_hot_cache(0);
    }
}
