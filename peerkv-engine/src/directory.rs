//! # Group Directory
//!
//! Explicitly owned registry of groups by name. There is no hidden global:
//! the process creates one directory and hands it to whatever needs lookup
//! (the server's request dispatch, tests, the bootstrap binary).
//!
//! Lookups take the shared lock; create and destroy take the exclusive lock.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::group::Group;
use crate::peers::Getter;

/// Name -> group registry with init-on-create and explicit destroy.
#[derive(Default)]
pub struct GroupDirectory {
    groups: RwLock<HashMap<String, Arc<Group>, RandomState>>,
}

impl GroupDirectory {
    pub fn new() -> Self {
        GroupDirectory::default()
    }

    /// Creates and registers a group, replacing any previous group with the
    /// same name.
    pub fn create_group<G>(&self, name: &str, cache_bytes: usize, getter: G) -> Arc<Group>
    where
        G: Getter + 'static,
    {
        let group = Arc::new(Group::new(name, cache_bytes, Box::new(getter)));
        self.groups
            .write()
            .insert(name.to_string(), Arc::clone(&group));
        tracing::info!(group = name, cache_bytes, "group created");
        group
    }

    /// Looks up a group by name.
    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).map(Arc::clone)
    }

    /// Unregisters a group and returns it, so the caller can tear down any
    /// transport still bound to it.
    pub fn destroy(&self, name: &str) -> Option<Arc<Group>> {
        let removed = self.groups.write().remove(name);
        if removed.is_some() {
            tracing::info!(group = name, "group destroyed");
        }
        removed
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use peerkv_common::{ByteView, CacheResult};

    use super::*;

    fn echo_getter(key: &str) -> CacheResult<ByteView> {
        Ok(ByteView::new(key.as_bytes().to_vec()))
    }

    #[test]
    fn create_then_lookup_returns_the_same_group() {
        let directory = GroupDirectory::new();
        let created = directory.create_group("scores", 1024, echo_getter);
        let found = directory.get("scores").unwrap();
        assert!(Arc::ptr_eq(&created, &found));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn lookup_of_unknown_group_misses() {
        let directory = GroupDirectory::new();
        assert!(directory.get("nope").is_none());
    }

    #[test]
    fn create_with_same_name_replaces() {
        let directory = GroupDirectory::new();
        let first = directory.create_group("scores", 1024, echo_getter);
        let second = directory.create_group("scores", 2048, echo_getter);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&directory.get("scores").unwrap(), &second));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn destroy_unregisters() {
        let directory = GroupDirectory::new();
        directory.create_group("scores", 1024, echo_getter);
        assert!(directory.destroy("scores").is_some());
        assert!(directory.destroy("scores").is_none());
        assert!(directory.get("scores").is_none());
        assert!(directory.is_empty());
    }
}
