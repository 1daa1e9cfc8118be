//! # Expiry Index
//!
//! Deadline-ordered set over `(nanos, key)` pairs backing the store's
//! opportunistic expiry pruning. Only keys with a real deadline live here;
//! the store keeps the index in lockstep with its entries.
//!
//! Ranks are score-ordered with ties broken by key order, so rank 0 is
//! always the earliest deadline.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;

/// Score-ordered index from expiry deadline to key.
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    /// (deadline-nanos, key) pairs in ascending order.
    by_deadline: BTreeSet<(i64, Arc<str>)>,
    /// Key to its current deadline, for O(log n) removal by key.
    scores: HashMap<Arc<str>, i64, RandomState>,
}

impl ExpiryIndex {
    pub fn new() -> Self {
        ExpiryIndex::default()
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Inserts or updates a key's deadline.
    ///
    /// Re-adding a key replaces its previous score.
    pub fn add(&mut self, key: Arc<str>, score: i64) {
        if let Some(old) = self.scores.insert(Arc::clone(&key), score) {
            self.by_deadline.remove(&(old, Arc::clone(&key)));
        }
        self.by_deadline.insert((score, key));
    }

    /// Removes a key. Returns true when the key was indexed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.scores.remove_entry(key) {
            Some((key, score)) => {
                self.by_deadline.remove(&(score, key));
                true
            }
            None => false,
        }
    }

    /// Returns the key with the earliest deadline.
    pub fn peek_earliest(&self) -> Option<(Arc<str>, i64)> {
        self.by_deadline
            .iter()
            .next()
            .map(|(score, key)| (Arc::clone(key), *score))
    }

    /// Returns the keys at ranks `first..=last`, rank 0 being the earliest.
    pub fn range_by_rank(&self, first: usize, last: usize) -> Vec<(Arc<str>, i64)> {
        self.by_deadline
            .iter()
            .skip(first)
            .take(last.saturating_sub(first) + 1)
            .map(|(score, key)| (Arc::clone(key), *score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn earliest_deadline_comes_first() {
        let mut index = ExpiryIndex::new();
        index.add(key("late"), 300);
        index.add(key("early"), 100);
        index.add(key("mid"), 200);

        let (k, score) = index.peek_earliest().unwrap();
        assert_eq!(&*k, "early");
        assert_eq!(score, 100);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn ties_break_by_key_order() {
        let mut index = ExpiryIndex::new();
        index.add(key("b"), 100);
        index.add(key("a"), 100);

        let ranked = index.range_by_rank(0, 1);
        assert_eq!(&*ranked[0].0, "a");
        assert_eq!(&*ranked[1].0, "b");
    }

    #[test]
    fn re_add_replaces_score() {
        let mut index = ExpiryIndex::new();
        index.add(key("k"), 500);
        index.add(key("k"), 50);

        assert_eq!(index.len(), 1);
        assert_eq!(index.peek_earliest().unwrap().1, 50);
    }

    #[test]
    fn remove_clears_both_views() {
        let mut index = ExpiryIndex::new();
        index.add(key("k"), 10);
        assert!(index.remove("k"));
        assert!(!index.remove("k"));
        assert!(index.is_empty());
        assert!(index.peek_earliest().is_none());
    }

    #[test]
    fn range_by_rank_clamps_to_len() {
        let mut index = ExpiryIndex::new();
        index.add(key("a"), 1);
        index.add(key("b"), 2);

        let all = index.range_by_rank(0, 10);
        assert_eq!(all.len(), 2);
        let tail = index.range_by_rank(1, 1);
        assert_eq!(&*tail[0].0, "b");
    }
}
