//! Ties the catalog, the dispatch queue, and the load rebalancer together
//! into the single entry point network I/O workers and writer maintenance
//! passes actually call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ingest_errors::IngestResult;
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogLookup, TableUpdateDetails};
use crate::config::IngestConfig;
use crate::event::{MeasurementEvent, RowPayload};
use crate::facade::CatalogFacade;
use crate::queue::{ClaimResult, ConsumerHandle, DispatchQueue};

/// The scheduler: owns the catalog and the dispatch queue, and exposes the
/// two operations every other component needs from it — routing a parsed
/// row to its writer thread, and periodically rebalancing writer-thread
/// load.
pub struct Scheduler<F: CatalogFacade> {
    facade: Arc<F>,
    catalog: Arc<Catalog>,
    queue: DispatchQueue<MeasurementEvent>,
    next_writer: AtomicUsize,
    config: IngestConfig,
    /// Stands in for the catalog's write lock in `tryCommitRow`'s
    /// non-blocking `loadRebalance` attempt: whichever I/O worker's row
    /// happens to cross the rebalance threshold first takes this, runs the
    /// rebalancer, and releases it; every other worker that crosses the
    /// threshold in the meantime just finds it held and moves on, since a
    /// rebalance decision a few hundred rows stale is no less valid than
    /// one computed this instant.
    rebalance_lock: parking_lot::Mutex<()>,
}

impl<F: CatalogFacade> Scheduler<F> {
    /// Builds a scheduler backed by `facade`, returning it alongside one
    /// consumer handle per writer thread (`config.n_writer_threads`),
    /// which the caller hands one each to its writer-thread [`WriterJob`](crate::writer_job::WriterJob)s.
    pub fn new(facade: Arc<F>, config: IngestConfig) -> (Self, Vec<ConsumerHandle<MeasurementEvent>>) {
        let (queue, consumers) = DispatchQueue::new(config.writer_queue_capacity, config.n_writer_threads);
        let scheduler = Scheduler {
            facade,
            catalog: Arc::new(Catalog::new()),
            queue,
            next_writer: AtomicUsize::new(0),
            config,
            rebalance_lock: parking_lot::Mutex::new(()),
        };
        (scheduler, consumers)
    }

    /// Read-only access to the catalog, for maintenance passes and tests.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// A cloned handle to the same catalog this scheduler routes rows
    /// through, for handing to the writer threads that apply them.
    pub fn catalog_handle(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// The configuration this scheduler was built with.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn assign_writer_thread(&self) -> usize {
        self.next_writer.fetch_add(1, Ordering::Relaxed) % self.config.n_writer_threads.max(1)
    }

    /// Resolves `table`'s catalog entry, creating and registering a new
    /// physical table (round-robin assigned to a writer thread) if the
    /// catalog has never seen it, or reactivating it (with a fresh writer
    /// assignment) if it was previously idled.
    pub fn resolve_table(&self, table: &str) -> IngestResult<Arc<TableUpdateDetails>> {
        match self.catalog.lookup(table) {
            CatalogLookup::Active => Ok(self
                .catalog
                .get_active(table)
                .expect("lookup reported Active")),
            CatalogLookup::Idle => {
                let writer_thread = self.assign_writer_thread();
                Ok(self.catalog.reactivate(table, writer_thread))
            }
            CatalogLookup::Unknown => {
                use crate::facade::TableStatus;
                if self.facade.status(table) != TableStatus::Exists {
                    self.facade.create_table(
                        table,
                        self.config.default_partition_by,
                        self.config.default_symbol_cache_flag,
                        self.config.default_symbol_capacity,
                    )?;
                }
                let writer_thread = self.assign_writer_thread();
                Ok(self.catalog.register_active(table, writer_thread))
            }
        }
    }

    /// Routes one parsed, already-affinity-resolved row onto the dispatch
    /// queue. Spins briefly if the queue is momentarily full; this is the
    /// network I/O worker's only blocking point in the hot path.
    pub fn try_commit_row(&self, table: &Arc<str>, timestamp: Option<i64>, row: RowPayload) {
        let details = loop {
            match self.resolve_table(table) {
                Ok(details) => break details,
                Err(err) => {
                    debug!(%table, error = %err, "dropping row: table resolution failed");
                    return;
                }
            }
        };
        self.commit_row(&details, timestamp, row);
    }

    /// Routes one row to its already-resolved table's writer thread.
    /// Callers that keep their own handle on a table's
    /// [`TableUpdateDetails`] (notably [`NetworkIoJob`](crate::io_job::NetworkIoJob),
    /// which caches it per table) should call this directly rather than
    /// [`try_commit_row`](Self::try_commit_row) to avoid re-resolving the
    /// table through the catalog on every row.
    pub fn commit_row(&self, details: &Arc<TableUpdateDetails>, timestamp: Option<i64>, row: RowPayload) {
        let n_updates = details.record_update();
        self.publish_data(&details.name, details.writer_thread(), timestamp, row);

        if self.config.n_updates_per_load_rebalance > 0
            && n_updates % self.config.n_updates_per_load_rebalance == 0
        {
            if let Some(_guard) = self.rebalance_lock.try_lock() {
                self.load_rebalance();
            }
        }
    }

    fn publish_data(&self, table: &Arc<str>, writer_thread: usize, timestamp: Option<i64>, row: RowPayload) {
        let seq = loop {
            match self.queue.try_claim() {
                ClaimResult::Slot(seq) => break seq,
                ClaimResult::Contended => std::hint::spin_loop(),
                ClaimResult::Full => {
                    metrics::counter!("ingest_queue_full_total").increment(1);
                    std::thread::yield_now();
                }
            }
        };
        self.queue.publish(seq, |event| {
            event.reset(Arc::clone(table), writer_thread, timestamp);
            event.row.entities.extend(row.entities);
        });
    }

    /// Publishes the `RELEASE_WRITER` control event for `table`. Called by
    /// a network I/O worker's maintenance pass once it determines it was
    /// the sole remaining holder of `table` in its local cache (see
    /// `io_job.rs`). Every writer thread inspects this event regardless of
    /// address; whichever one currently owns `table` commits, closes, and
    /// drops it, provided the catalog hasn't already reactivated the table
    /// by the time the event is drained.
    pub fn publish_release_writer(&self, table: Arc<str>) {
        let seq = loop {
            match self.queue.try_claim() {
                ClaimResult::Slot(seq) => break seq,
                ClaimResult::Contended => std::hint::spin_loop(),
                ClaimResult::Full => std::thread::yield_now(),
            }
        };
        self.queue.publish(seq, |event| {
            event.reset_release_writer(Arc::clone(&table));
        });
    }

    /// Examines every active table's racy load counter and, if the
    /// busiest writer thread's aggregate load exceeds the least-busy
    /// writer's by more than `config.max_load_ratio`, migrates that
    /// writer's single least-active table to the least-busy writer.
    ///
    /// The migration itself is a single in-band `Rebalance` control event
    /// published to the dispatch queue, immediately followed by flipping
    /// the table's `writer_thread` in the catalog. Every writer thread sees
    /// that event, in the same order, before it sees any data event
    /// published after it — the "from" writer applies everything it was
    /// handed up to that point, then relinquishes the table and sets the
    /// handshake bit; the "to" writer refuses to touch the table until it
    /// observes that bit. This is what gives the handoff a clean,
    /// data-loss-free cutover rather than relying on two writers'
    /// independent consumer cursors to agree on when the move happened.
    pub fn load_rebalance(&self) {
        let snapshot = self.catalog.active_snapshot();
        let n = self.config.n_writer_threads.max(1);
        if n < 2 || snapshot.is_empty() {
            return;
        }
        let mut per_writer_load = vec![0u64; n];
        for details in &snapshot {
            per_writer_load[details.writer_thread()] += details.n_updates();
        }
        let (hi, &hi_load) = per_writer_load
            .iter()
            .enumerate()
            .max_by_key(|(_, load)| **load)
            .expect("n >= 2 checked above");
        let (lo, &lo_load) = per_writer_load
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| **load)
            .expect("n >= 2 checked above");
        if hi == lo || lo_load == 0 {
            return;
        }
        let ratio = hi_load as f64 / lo_load as f64;
        if ratio <= self.config.max_load_ratio {
            return;
        }
        let victim = snapshot
            .iter()
            .filter(|d| d.writer_thread() == hi)
            .min_by_key(|d| d.n_updates());
        if let Some(victim) = victim {
            info!(
                table = %victim.name,
                from = hi,
                to = lo,
                ratio,
                "rebalancing table to a less busy writer thread"
            );
            let handoff_done = Arc::new(AtomicBool::new(false));
            let seq = loop {
                match self.queue.try_claim() {
                    ClaimResult::Slot(seq) => break seq,
                    ClaimResult::Contended => std::hint::spin_loop(),
                    ClaimResult::Full => std::thread::yield_now(),
                }
            };
            self.queue.publish(seq, |event| {
                event.reset_rebalance(Arc::clone(&victim.name), hi, lo, Arc::clone(&handoff_done));
            });
            victim.set_writer_thread(lo);
            metrics::counter!("ingest_rebalances_total").increment(1);
        }
        // Reset every table's racy load counter regardless of whether a
        // move happened, so the next pass judges load against fresh
        // traffic instead of accumulating history that would keep
        // pointing at the same tables.
        for details in &snapshot {
            details.reset_updates();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCatalogFacade;

    fn scheduler(n_writer_threads: usize) -> (Scheduler<FakeCatalogFacade>, Vec<ConsumerHandle<MeasurementEvent>>) {
        let mut config = IngestConfig::default();
        config.n_writer_threads = n_writer_threads;
        config.writer_queue_capacity = 64;
        Scheduler::new(Arc::new(FakeCatalogFacade::default()), config)
    }

    #[test]
    fn resolve_table_creates_then_reuses() {
        let (scheduler, _consumers) = scheduler(2);
        let first = scheduler.resolve_table("cpu").unwrap();
        let second = scheduler.resolve_table("cpu").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn try_commit_row_publishes_to_queue() {
        let (scheduler, consumers) = scheduler(1);
        let table: Arc<str> = Arc::from("cpu");
        scheduler.try_commit_row(&table, Some(1), RowPayload::default());
        let seen = consumers[0].peek().map(|e| e.table.to_string());
        assert_eq!(seen, Some("cpu".to_string()));
    }

    #[test]
    fn load_rebalance_moves_least_active_table_off_busiest_writer() {
        let (scheduler, consumers) = scheduler(2);
        let hot_a = scheduler.resolve_table("hot_a").unwrap();
        let hot_b = scheduler.resolve_table("hot_b").unwrap();
        // force both onto writer 0 to simulate an imbalance
        hot_a.set_writer_thread(0);
        hot_b.set_writer_thread(0);
        for _ in 0..1000 {
            hot_a.record_update();
        }
        for _ in 0..10 {
            hot_b.record_update();
        }
        let cold = scheduler.resolve_table("cold").unwrap();
        cold.set_writer_thread(1);
        cold.record_update();

        scheduler.load_rebalance();
        // the least-active table on the busiest writer (hot_b) is the one
        // moved; its writer assignment flips immediately, and a Rebalance
        // control event naming it lands on every consumer.
        assert_eq!(hot_b.writer_thread(), 1);
        assert_eq!(hot_a.writer_thread(), 0);
        let seen = consumers[0].peek().expect("rebalance event published");
        match &seen.kind {
            crate::event::EventKind::Rebalance { from, to, .. } => {
                assert_eq!(seen.table.as_ref(), "hot_b");
                assert_eq!(*from, 0);
                assert_eq!(*to, 1);
            }
            other => panic!("expected Rebalance event, got {other:?}"),
        }
    }

    #[test]
    fn load_rebalance_is_a_no_op_below_ratio_threshold() {
        let (scheduler, consumers) = scheduler(2);
        let a = scheduler.resolve_table("a").unwrap();
        let b = scheduler.resolve_table("b").unwrap();
        a.set_writer_thread(0);
        b.set_writer_thread(1);
        a.record_update();
        b.record_update();
        scheduler.load_rebalance();
        assert_eq!(a.writer_thread(), 0);
        assert_eq!(b.writer_thread(), 1);
        assert!(consumers[0].peek().is_none());
    }
}
