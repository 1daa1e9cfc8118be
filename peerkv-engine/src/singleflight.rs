//! # Single Flight
//!
//! Per-key coalescing of in-flight loads: however many callers ask for the
//! same key at once, the loader runs exactly once and every caller gets the
//! same outcome. This is the cache's protection against thundering-herd
//! origin queries.
//!
//! The shared value is typed by the caller, so no dynamic downcasting is
//! involved; results and errors are cloned to each waiter.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use peerkv_common::CacheResult;

/// In-flight call record: completion latch plus the shared outcome slot.
struct Call<T> {
    outcome: Mutex<Option<CacheResult<T>>>,
    done: Condvar,
}

impl<T> Call<T> {
    fn new() -> Self {
        Call {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

/// Per-key load coalescer.
///
/// The map lock is held only while installing or joining a record; the
/// loader itself runs outside it.
pub struct Flight<T> {
    calls: Mutex<HashMap<String, Arc<Call<T>>, RandomState>>,
}

impl<T: Clone> Flight<T> {
    pub fn new() -> Self {
        Flight {
            calls: Mutex::new(HashMap::default()),
        }
    }

    /// Runs `load` for `key`, coalescing with any concurrent call.
    ///
    /// The leader installs a record, runs `load`, publishes the outcome, and
    /// only then removes the record; late joiners that caught the finishing
    /// record observe the final outcome immediately.
    pub fn fly<F>(&self, key: &str, load: F) -> CacheResult<T>
    where
        F: FnOnce() -> CacheResult<T>,
    {
        let (call, leader) = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let call = Arc::new(Call::new());
                    calls.insert(key.to_string(), Arc::clone(&call));
                    (call, true)
                }
            }
        };

        if !leader {
            let mut slot = call.outcome.lock();
            while slot.is_none() {
                call.done.wait(&mut slot);
            }
            return slot.as_ref().expect("completed call has outcome").clone();
        }

        let outcome = load();
        {
            let mut slot = call.outcome.lock();
            *slot = Some(outcome.clone());
            call.done.notify_all();
        }
        self.calls.lock().remove(key);
        outcome
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Flight::new()
    }
}
