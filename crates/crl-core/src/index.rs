//! # Derived Indexes
//!
//! One-to-many maps used for the owner->children and target->listeners
//! indexes, plus the pending ("cached pointer") variants used during
//! recovery. Each map carries its own lock, held only for a single update.

use crate::types::ConceptId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// A thread-safe `ConceptId -> {ConceptId}` map.
///
/// Empty value sets are removed so that `keys()` only reports live entries.
#[derive(Debug, Default)]
pub struct OneToNMap {
    inner: RwLock<BTreeMap<ConceptId, BTreeSet<ConceptId>>>,
}

impl OneToNMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `key`. Returns true if it was not already present.
    pub fn add(&self, key: ConceptId, value: ConceptId) -> bool {
        self.inner.write().entry(key).or_default().insert(value)
    }

    /// Remove `value` from under `key`. Returns true if it was present.
    pub fn remove(&self, key: &ConceptId, value: &ConceptId) -> bool {
        let mut inner = self.inner.write();
        let Some(values) = inner.get_mut(key) else {
            return false;
        };
        let removed = values.remove(value);
        if values.is_empty() {
            inner.remove(key);
        }
        removed
    }

    /// Copy of the values stored under `key`.
    #[must_use]
    pub fn get(&self, key: &ConceptId) -> BTreeSet<ConceptId> {
        self.inner.read().get(key).cloned().unwrap_or_default()
    }

    /// Whether `value` is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &ConceptId, value: &ConceptId) -> bool {
        self.inner
            .read()
            .get(key)
            .is_some_and(|values| values.contains(value))
    }

    /// Replace the whole value set under `key`.
    pub fn set(&self, key: ConceptId, values: BTreeSet<ConceptId>) {
        let mut inner = self.inner.write();
        if values.is_empty() {
            inner.remove(&key);
        } else {
            inner.insert(key, values);
        }
    }

    /// Remove and return the value set under `key`.
    pub fn take(&self, key: &ConceptId) -> BTreeSet<ConceptId> {
        self.inner.write().remove(key).unwrap_or_default()
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn entries(&self) -> Vec<(ConceptId, BTreeSet<ConceptId>)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let map = OneToNMap::new();
        let (k, a, b) = (
            ConceptId::generate(),
            ConceptId::generate(),
            ConceptId::generate(),
        );

        assert!(map.add(k, a));
        assert!(!map.add(k, a));
        assert!(map.add(k, b));
        assert_eq!(map.get(&k).len(), 2);

        assert!(map.remove(&k, &a));
        assert!(!map.remove(&k, &a));
        assert!(map.contains(&k, &b));

        map.remove(&k, &b);
        assert!(map.entries().is_empty());
    }

    #[test]
    fn set_empty_clears_key() {
        let map = OneToNMap::new();
        let k = ConceptId::generate();
        map.add(k, ConceptId::generate());
        map.set(k, BTreeSet::new());
        assert!(map.get(&k).is_empty());
        assert!(map.entries().is_empty());
    }

    #[test]
    fn take_drains_key() {
        let map = OneToNMap::new();
        let (k, v) = (ConceptId::generate(), ConceptId::generate());
        map.add(k, v);
        let taken = map.take(&k);
        assert!(taken.contains(&v));
        assert!(map.get(&k).is_empty());
    }
}
