//! The scheduler's view of which tables exist, which writer thread
//! currently owns each one, and how busy that assignment is.
//!
//! [`Catalog`] is the single source of truth: one [`parking_lot::RwLock`]
//! guarding two maps, active tables and idle tables, each keyed by table
//! name. Readers (every I/O worker, on nearly every row) take the read
//! lock; writers (table creation, rebalance, idle eviction) take the write
//! lock. This is a deliberately simpler design than a left-right or
//! epoch-reclaimed reader map: table creation and rebalance are rare
//! relative to row throughput, and I/O workers do not hold the lock across
//! a row's processing — they look up an `Arc` once and cache it locally in
//! their own [`ThreadLocalDetails`], so read-lock hold time stays short
//! even under heavy fan-out.
//!
//! I/O workers never hold a strong reference to a [`TableUpdateDetails`]
//! across maintenance boundaries: [`ThreadLocalDetails`] caches a `Weak`
//! handle per table, re-validated with `upgrade()` on each maintenance
//! tick. If the catalog has since idled or recreated the table, the weak
//! handle fails to upgrade and the worker re-resolves it from the catalog,
//! rather than keeping an idled table pinned in memory indefinitely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::symbol::SymbolCache;

/// The catalog's bookkeeping record for one table, shared by every I/O
/// worker that has ever routed a row to it and the single writer thread
/// that currently owns it.
pub struct TableUpdateDetails {
    /// The table's name, duplicated here so holders of just an `Arc`
    /// don't need to round-trip through the catalog to know which table
    /// they're looking at.
    pub name: Arc<str>,
    /// Index of the writer thread currently assigned to this table.
    /// Updated by the rebalancer; read racily and often by I/O workers
    /// deciding which writer's dispatch cursor to publish a row's affinity
    /// against.
    writer_thread: AtomicUsize,
    /// A deliberately unsynchronized, per-table row counter used only to
    /// decide when it is worth attempting a load rebalance. Reads and
    /// writes are `Relaxed`: an exactly-right count is not required, only
    /// one that trends with real traffic.
    n_updates: AtomicU64,
    /// Bumped every time `writer_thread` changes. `ThreadLocalDetails`
    /// compares its cached generation against this to detect a rebalance
    /// it has not yet reacted to.
    generation: AtomicU64,
    /// Count of network I/O workers that currently hold this table in
    /// their own [`ThreadLocalDetails`] cache. A [`NetworkIoJob`](crate::io_job::NetworkIoJob)
    /// increments this the first time it resolves the table and decrements
    /// it when its local cache entry goes stale; the worker that decrements
    /// it to zero is, by construction, the sole remaining holder, and is
    /// the one responsible for publishing `RELEASE_WRITER` (see
    /// `io_job.rs`'s `maintenance_tick`).
    io_holders: AtomicUsize,
}

impl TableUpdateDetails {
    fn new(name: Arc<str>, writer_thread: usize) -> Self {
        TableUpdateDetails {
            name,
            writer_thread: AtomicUsize::new(writer_thread),
            n_updates: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            io_holders: AtomicUsize::new(0),
        }
    }

    /// The writer thread index currently assigned to this table.
    pub fn writer_thread(&self) -> usize {
        self.writer_thread.load(Ordering::Acquire)
    }

    /// Racy load-tracking counter, incremented once per row routed to this
    /// table.
    pub fn n_updates(&self) -> u64 {
        self.n_updates.load(Ordering::Relaxed)
    }

    /// Increments the racy load-tracking counter, returning the
    /// post-increment value so callers can cheaply decide whether this row
    /// crossed a rebalance-attempt threshold without a second atomic load.
    pub fn record_update(&self) -> u64 {
        self.n_updates.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Zeroes the racy load-tracking counter. Called by the rebalancer at
    /// the end of every `loadRebalance` pass, whether or not it moved a
    /// table, so successive passes judge load against fresh traffic rather
    /// than accumulating history that would bias them toward re-moving the
    /// same tables.
    pub fn reset_updates(&self) {
        self.n_updates.store(0, Ordering::Relaxed);
    }

    /// This table's generation counter, bumped on every writer-thread
    /// reassignment.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Flips the writer-thread assignment immediately (called by the
    /// scheduler right after it has published the in-band `Rebalance`
    /// event that every writer — "from" and "to" alike — will observe, in
    /// order, before either one treats a later row as belonging to the new
    /// owner). Bumps the generation so `ThreadLocalDetails` can detect the
    /// change.
    pub fn set_writer_thread(&self, writer_thread: usize) {
        self.writer_thread.store(writer_thread, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Called by a network I/O worker the first time it resolves this
    /// table into its own local cache, returning the post-increment holder
    /// count.
    pub fn inc_io_holder(&self) -> usize {
        self.io_holders.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Called by a network I/O worker when its local cache entry for this
    /// table goes stale, returning the post-decrement holder count.
    pub fn dec_io_holder(&self) -> usize {
        self.io_holders.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Current count of I/O workers holding this table in their local
    /// cache.
    pub fn io_holder_count(&self) -> usize {
        self.io_holders.load(Ordering::Acquire)
    }
}

struct CatalogState {
    active: HashMap<String, Arc<TableUpdateDetails>>,
    /// Idle tables carry no `TableUpdateDetails` at all: the catalog is the
    /// sole strong owner of that type, so idling a table means dropping
    /// its entry here entirely, which lets any `Weak` handle an I/O
    /// worker cached die naturally rather than resolving to a writer
    /// assignment that no longer holds.
    idle: HashMap<String, ()>,
}

/// Whether a table the catalog was asked about is live, parked in the idle
/// set, or entirely unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogLookup {
    /// The table has an active writer-thread assignment.
    Active,
    /// The table exists but its writer has been released to save
    /// resources; the next write to it must go through
    /// [`Catalog::reactivate`].
    Idle,
    /// The catalog has no record of this table at all.
    Unknown,
}

/// Table registry and writer-thread assignment table, guarded by a single
/// read/write lock.
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new()
    }
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Catalog {
            state: RwLock::new(CatalogState {
                active: HashMap::new(),
                idle: HashMap::new(),
            }),
        }
    }

    /// Looks up `table`'s current status without taking a strong
    /// reference.
    pub fn lookup(&self, table: &str) -> CatalogLookup {
        let state = self.state.read();
        if state.active.contains_key(table) {
            CatalogLookup::Active
        } else if state.idle.contains_key(table) {
            CatalogLookup::Idle
        } else {
            CatalogLookup::Unknown
        }
    }

    /// Returns the active details for `table`, if any.
    pub fn get_active(&self, table: &str) -> Option<Arc<TableUpdateDetails>> {
        self.state.read().active.get(table).cloned()
    }

    /// Registers a newly created table as active, assigned to
    /// `writer_thread`. Overwrites any prior active entry of the same
    /// name, which is only safe because callers are expected to have
    /// checked [`lookup`](Self::lookup) first.
    pub fn register_active(&self, table: &str, writer_thread: usize) -> Arc<TableUpdateDetails> {
        let details = Arc::new(TableUpdateDetails::new(Arc::from(table), writer_thread));
        self.state
            .write()
            .active
            .insert(table.to_string(), Arc::clone(&details));
        details
    }

    /// Moves `table` from the active set into the idle set. Any
    /// [`ThreadLocalDetails`]'s `Weak` handle to the old entry is dropped
    /// here, since idling replaces the table's `Arc` identity; cached
    /// handles will fail to `upgrade()` and be re-resolved on next use.
    pub fn idle(&self, table: &str) {
        let mut state = self.state.write();
        if state.active.remove(table).is_some() {
            state.idle.insert(table.to_string(), ());
        }
    }

    /// Moves `table` from the idle set back into the active set with a
    /// fresh writer-thread assignment, returning the (new) details. Used
    /// when a row arrives for a table whose writer had been released.
    pub fn reactivate(&self, table: &str, writer_thread: usize) -> Arc<TableUpdateDetails> {
        let mut state = self.state.write();
        state.idle.remove(table);
        let details = Arc::new(TableUpdateDetails::new(Arc::from(table), writer_thread));
        state.active.insert(table.to_string(), Arc::clone(&details));
        details
    }

    /// Snapshots every active table's details. Used by the rebalancer,
    /// which needs a consistent-enough view of the whole active set to
    /// compute per-writer load; held only long enough to clone the `Arc`s.
    pub fn active_snapshot(&self) -> Vec<Arc<TableUpdateDetails>> {
        self.state.read().active.values().cloned().collect()
    }

    /// Number of tables currently active, for diagnostics and tests.
    pub fn active_len(&self) -> usize {
        self.state.read().active.len()
    }

    /// Number of tables currently idle, for diagnostics and tests.
    pub fn idle_len(&self) -> usize {
        self.state.read().idle.len()
    }
}

/// One I/O worker's cache of per-table state: a non-owning handle to the
/// table's catalog entry plus that worker's own symbol caches for the
/// table's symbol columns.
///
/// Caching `Weak` rather than `Arc` is the load-bearing choice here (per
/// the catalog's own doc comment): an I/O worker that cached strong
/// references would keep idled tables' details alive indefinitely, and
/// would not notice a reactivation that replaced the details' identity.
pub struct ThreadLocalDetails {
    entries: AHashMap<String, CachedEntry>,
}

struct CachedEntry {
    details: Weak<TableUpdateDetails>,
    symbol_caches: AHashMap<String, SymbolCache>,
    last_seen_ms: AtomicI64,
}

impl Default for ThreadLocalDetails {
    fn default() -> Self {
        ThreadLocalDetails::new()
    }
}

impl ThreadLocalDetails {
    /// Creates an empty per-worker cache.
    pub fn new() -> Self {
        ThreadLocalDetails {
            entries: AHashMap::new(),
        }
    }

    /// Returns this worker's cached handle for `table` if it is still
    /// live, touching its last-seen timestamp. Returns `None` on a cold
    /// cache or a stale (since-idled) entry; the caller should resolve the
    /// table from the [`Catalog`] and call [`insert`](Self::insert).
    pub fn get(&self, table: &str, now_ms: i64) -> Option<Arc<TableUpdateDetails>> {
        let entry = self.entries.get(table)?;
        let details = entry.details.upgrade()?;
        entry.last_seen_ms.store(now_ms, Ordering::Relaxed);
        Some(details)
    }

    /// Caches a freshly resolved handle for `table`, replacing any prior
    /// (now-stale) entry but preserving that table's existing per-column
    /// symbol caches if this worker had already built them up.
    pub fn insert(&mut self, table: &str, details: &Arc<TableUpdateDetails>, now_ms: i64) {
        let symbol_caches = self
            .entries
            .remove(table)
            .map(|e| e.symbol_caches)
            .unwrap_or_default();
        self.entries.insert(
            table.to_string(),
            CachedEntry {
                details: Arc::downgrade(details),
                symbol_caches,
                last_seen_ms: AtomicI64::new(now_ms),
            },
        );
    }

    /// Returns a mutable reference to this worker's symbol cache for
    /// `table`'s `column`, creating an empty one (with `capacity` slots)
    /// on first use.
    pub fn symbol_cache(&mut self, table: &str, column: &str, capacity: usize) -> &mut SymbolCache {
        let entry = self
            .entries
            .entry(table.to_string())
            .or_insert_with(|| CachedEntry {
                details: Weak::new(),
                symbol_caches: AHashMap::new(),
                last_seen_ms: AtomicI64::new(0),
            });
        entry
            .symbol_caches
            .entry(column.to_string())
            .or_insert_with(|| SymbolCache::new(capacity))
    }

    /// Drops every cached entry whose handle has died (the table was
    /// idled or recreated elsewhere) or that hasn't been touched since
    /// before `min_seen_ms`. Called periodically from the I/O worker's
    /// maintenance pass, not from the hot path.
    pub fn prune(&mut self, min_seen_ms: i64) {
        self.entries.retain(|_, entry| {
            entry.details.strong_count() > 0
                && entry.last_seen_ms.load(Ordering::Relaxed) >= min_seen_ms
        });
    }

    /// Returns the name and live handle of one cached entry this worker
    /// hasn't touched since before `min_seen_ms`, without disturbing its
    /// last-seen timestamp. Used by `maintenance_tick` to find (at most)
    /// one table per tick to consider for idle release, bounding how much
    /// work a single maintenance pass can do.
    pub fn stale_details(&self, min_seen_ms: i64) -> Option<(String, Arc<TableUpdateDetails>)> {
        self.entries.iter().find_map(|(name, entry)| {
            if entry.last_seen_ms.load(Ordering::Relaxed) >= min_seen_ms {
                return None;
            }
            entry.details.upgrade().map(|details| (name.clone(), details))
        })
    }

    /// Drops this worker's cached entry for `table`, if any.
    pub fn remove(&mut self, table: &str) {
        self.entries.remove(table);
    }

    /// Number of tables this worker currently has cached, for diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if this worker has no cached tables.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
