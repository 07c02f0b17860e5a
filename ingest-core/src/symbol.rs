//! Per-column, per-I/O-worker front cache over a table's authoritative
//! symbol dictionary.
//!
//! Each [`crate::catalog::ThreadLocalDetails`] keeps one [`SymbolCache`] per
//! symbol column it has seen traffic for. The cache is consulted before a
//! raw tag value is placed into a [`crate::event::MeasurementEvent`]; a hit
//! lets the I/O worker hand the writer thread an already-resolved
//! `CachedTag`, skipping a dictionary lookup (and, on the writer's single
//! thread, a potential dictionary insert) that would otherwise happen for
//! every single row.
//!
//! The cache is deliberately not authoritative and not write-through: a
//! miss here does not mean the value is new to the table, only that this
//! particular I/O worker hasn't resolved it yet. Caches are never
//! cross-populated between I/O workers, so the same tag value can be
//! resolved redundantly on the writer thread multiple times across
//! different workers' first encounters with it; this is an accepted,
//! intentionally racy approximation traded for not needing any
//! cross-thread synchronization on the hot path.

use ahash::AHashMap;

use crate::facade::SymbolTableLookup;

/// A bounded, per-column cache mapping tag strings to previously resolved
/// symbol indices.
#[derive(Debug, Default)]
pub struct SymbolCache {
    entries: AHashMap<Box<str>, i32>,
    capacity: usize,
}

impl SymbolCache {
    /// Creates an empty cache that holds at most `capacity` entries before
    /// evicting.
    pub fn new(capacity: usize) -> Self {
        SymbolCache {
            entries: AHashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Returns the cached symbol index for `value`, if present.
    pub fn get(&self, value: &str) -> Option<i32> {
        self.entries.get(value).copied()
    }

    /// Records that `value` resolves to `sym_id`. If the cache is at
    /// capacity, a single arbitrary entry is evicted first — this cache
    /// optimizes for the common case of a small, stable tag cardinality,
    /// not for strict LRU behavior.
    pub fn insert(&mut self, value: &str, sym_id: i32) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(value) {
            if let Some(evict) = self.entries.keys().next().cloned() {
                self.entries.remove(&evict);
            }
        }
        self.entries.insert(value.into(), sym_id);
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves `value` against this cache first, falling back to `lookup`
    /// (the table's authoritative symbol-table façade) on a miss, and
    /// populating the cache from the fallback's answer.
    pub fn resolve_or_lookup(
        &mut self,
        table: &str,
        column: &str,
        value: &str,
        lookup: &dyn SymbolTableLookup,
    ) -> Option<i32> {
        if let Some(id) = self.get(value) {
            return Some(id);
        }
        let id = lookup.lookup(table, column, value)?;
        self.insert(value, id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLookup(i32);
    impl SymbolTableLookup for StaticLookup {
        fn lookup(&self, _table: &str, _column: &str, _value: &str) -> Option<i32> {
            Some(self.0)
        }
    }

    #[test]
    fn hit_avoids_lookup() {
        let mut cache = SymbolCache::new(8);
        cache.insert("web01", 3);
        assert_eq!(cache.get("web01"), Some(3));
    }

    #[test]
    fn miss_falls_through_and_populates() {
        let mut cache = SymbolCache::new(8);
        let lookup = StaticLookup(7);
        assert_eq!(cache.get("web02"), None);
        let resolved = cache.resolve_or_lookup("cpu", "host", "web02", &lookup);
        assert_eq!(resolved, Some(7));
        assert_eq!(cache.get("web02"), Some(7));
    }

    #[test]
    fn zero_capacity_never_caches() {
        let mut cache = SymbolCache::new(0);
        cache.insert("x", 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_bounds_size() {
        let mut cache = SymbolCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert!(cache.len() <= 2);
    }
}
