//! The writer thread's [`Runnable`]: drains its dispatch-queue consumer
//! cursor, applies each event addressed to a table it owns, and runs
//! periodic maintenance (commit hysteresis, idle-writer release, rebalance
//! handoff).

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ingest_errors::{IngestError, IngestResult};
use ingest_util::colname::is_valid_column_name;
use ingest_util::WallClock;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogLookup, TableUpdateDetails};
use crate::config::IngestConfig;
use crate::event::{EntityValue, EventKind, MeasurementEvent};
use crate::facade::{CatalogFacade, ColumnType};
use crate::pool::Runnable;
use crate::queue::ConsumerHandle;

struct OwnedTable<W> {
    writer: W,
}

/// Drains one writer thread's share of the dispatch queue.
///
/// A writer thread "owns" a table once it has acquired that table's
/// [`TableWriter`](crate::facade::TableWriter) handle from the catalog
/// façade; it keeps applying events addressed to that table until a
/// rebalance reassigns it elsewhere. Events addressed to a table this
/// thread does not own are released (skipped) without being read further,
/// which is how the broadcast dispatch queue's "every consumer sees every
/// event" design stays correct under per-table affinity: ownership is
/// decided out of band by [`Catalog`], not by the queue.
pub struct WriterJob<F: CatalogFacade> {
    worker_id: usize,
    facade: Arc<F>,
    catalog: Arc<Catalog>,
    consumer: ConsumerHandle<MeasurementEvent>,
    config: IngestConfig,
    clock: Arc<dyn WallClock>,
    owned: HashMap<String, OwnedTable<F::Writer>>,
}

impl<F: CatalogFacade> WriterJob<F> {
    /// Builds a writer job for `worker_id`, reading from `consumer` and
    /// applying rows through `facade`.
    pub fn new(
        worker_id: usize,
        facade: Arc<F>,
        catalog: Arc<Catalog>,
        consumer: ConsumerHandle<MeasurementEvent>,
        config: IngestConfig,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        WriterJob {
            worker_id,
            facade,
            catalog,
            consumer,
            config,
            clock,
            owned: HashMap::new(),
        }
    }

    /// Acquires (or returns the already-open) writer handle for `details`,
    /// the table this thread has just discovered it owns.
    fn acquire(&mut self, details: &Arc<TableUpdateDetails>) -> IngestResult<&mut OwnedTable<F::Writer>> {
        if !self.owned.contains_key(details.name.as_ref()) {
            let writer = self.facade.get_writer(&details.name)?;
            self.owned.insert(details.name.to_string(), OwnedTable { writer });
        }
        Ok(self.owned.get_mut(details.name.as_ref()).expect("just inserted"))
    }

    /// Applies one data event's row to its owning writer, creating any
    /// missing columns, then appends and (if the configured threshold is
    /// crossed) commits the row.
    ///
    /// Ownership is not re-checked here: [`handle_event`](Self::handle_event)
    /// already filtered on the event's own `writer_thread`, fixed at publish
    /// time, which is what keeps this thread's view of "whose row is this"
    /// consistent with the dispatch queue's total order rather than a live
    /// catalog lookup that a concurrent rebalance could have since changed.
    /// The only thing still consulted here is whether the table is active at
    /// all — if it has since been idled, the row is silently skipped, since
    /// an idle table was, by construction, not caught up on past events.
    fn apply_measurement_event(&mut self, event: &MeasurementEvent) -> IngestResult<()> {
        let details = match self.catalog.get_active(&event.table) {
            Some(details) => details,
            None => return Ok(()),
        };
        let now_ms = self.clock.now_ms();
        let max_uncommitted_rows = self.config.max_uncommitted_rows;
        let commit_hysteresis_micros = self.config.commit_hysteresis_micros;
        let owned = self.acquire(&details)?;
        let ts = event.timestamp.unwrap_or_else(|| now_ms * 1_000);
        let is_ooo = owned.writer.max_timestamp().map_or(false, |max| ts < max);
        owned.writer.new_row(ts)?;
        // A missing column forces a restart: the row is cancelled, the
        // column is created, and the row is reopened at the same
        // timestamp so every entity (including ones already applied
        // before the miss) is re-decoded against the now-complete schema.
        // Bounded by one restart per entity so a writer that keeps
        // reporting the same column missing cannot spin forever.
        let mut applied = false;
        for _ in 0..=event.row.entities.len() {
            match apply_entities(&mut owned.writer, event) {
                Ok(()) => {
                    applied = true;
                    break;
                }
                Err(ApplyOutcome::NeedsColumn { name, column_type }) => {
                    owned.writer.cancel_row();
                    if !is_valid_column_name(&name) {
                        return Err(IngestError::InvalidColumnName {
                            name: name.to_string(),
                        });
                    }
                    owned.writer.add_column(&name, column_type)?;
                    owned.writer.new_row(ts)?;
                }
                Err(ApplyOutcome::Fatal(err)) => {
                    owned.writer.cancel_row();
                    return Err(err);
                }
            }
        }
        if !applied {
            owned.writer.cancel_row();
            return Err(ingest_errors::internal!(
                "row for `{}` still had a missing column after exhausting restarts",
                event.table
            ));
        }
        owned.writer.append_row()?;
        metrics::counter!("ingest_rows_applied_total").increment(1);
        if is_ooo {
            // This commit crosses the partition's existing max timestamp:
            // run it through the merge planner instead of a plain append,
            // per §4.5. `commit` first so the row is part of the committed
            // range `begin_ooo_merge` rewrites, then hand the writer a plan
            // built from the partition's own row counts rather than a
            // materialised timestamp slice.
            let existing_row_count = owned.writer.partition_row_count();
            let prefix_count = owned.writer.partition_prefix_count(ts)?;
            owned.writer.commit()?;
            let plan = crate::ooo::plan_merge_from_counts(existing_row_count, prefix_count, 1);
            owned.writer.begin_ooo_merge(&plan)?;
            debug!(table = %event.table, ts, prefix_count, existing_row_count, "ran out-of-order commit through the merge planner");
        } else if owned.writer.uncommitted_rows() >= max_uncommitted_rows {
            owned.writer.commit_with_hysteresis(commit_hysteresis_micros)?;
            metrics::counter!("ingest_commits_total").increment(1);
        }
        Ok(())
    }

    /// Dispatches one event off the queue, mirroring the design's
    /// `drainQueue` rules: a [`EventKind::Data`] row is applied only if it is
    /// addressed to this thread; the two control events are inspected by
    /// every thread regardless of address.
    ///
    /// Returns `false` only for a [`EventKind::Rebalance`] this thread is the
    /// new owner of whose handoff has not yet completed — the event must
    /// stay at the head of this consumer's cursor so it is seen again next
    /// tick, rather than being released and potentially missed. Every other
    /// case returns `true`, meaning the caller should release the cursor
    /// past this event.
    fn handle_event(&mut self, event: &MeasurementEvent) -> bool {
        match &event.kind {
            EventKind::Incomplete => true,
            EventKind::Data => {
                if event.writer_thread == self.worker_id {
                    if let Err(err) = self.apply_measurement_event(event) {
                        warn!(table = %event.table, error = %err, "failed to apply row, dropping it");
                        metrics::counter!("ingest_rows_dropped_total").increment(1);
                    }
                }
                true
            }
            EventKind::Rebalance { from, to, handoff_done } => {
                if *to == self.worker_id {
                    // Must not treat this table as ours — or release this
                    // event — until the "from" side has drained and
                    // committed everything it was handed before the
                    // decision. Leaving the cursor here rather than
                    // releasing is what closes the cross-cursor race: this
                    // thread cannot run ahead of `from` and silently skip a
                    // row neither of us ever applies.
                    handoff_done.load(Ordering::Acquire)
                } else if *from == self.worker_id {
                    if let Some(mut owned) = self.owned.remove(event.table.as_ref()) {
                        if let Err(err) = owned.writer.commit() {
                            warn!(table = %event.table, error = %err, "commit before rebalance handoff failed");
                        }
                        if let Err(err) = owned.writer.close() {
                            warn!(table = %event.table, error = %err, "close during rebalance handoff failed");
                        }
                    }
                    info!(table = %event.table, from, to, "completed rebalance handoff");
                    handoff_done.store(true, Ordering::Release);
                    true
                } else {
                    true
                }
            }
            EventKind::ReleaseWriter => {
                // The catalog was idled before this event was published. If
                // nothing has reactivated the table in the meantime, this
                // thread (if it still owns it) closes it out; either way
                // every thread releases the event.
                if self.catalog.lookup(&event.table) != CatalogLookup::Active {
                    if let Some(mut owned) = self.owned.remove(event.table.as_ref()) {
                        if let Err(err) = owned.writer.commit() {
                            warn!(table = %event.table, error = %err, "final commit before idle release failed");
                        }
                        if let Err(err) = owned.writer.close() {
                            warn!(table = %event.table, error = %err, "close during idle release failed");
                        }
                        debug!(table = %event.table, "released idle writer");
                    }
                }
                true
            }
        }
    }
}

/// What happened on one pass over a row's entities: either every entity
/// applied cleanly, a column needs to be created first (forcing the
/// cancel/reopen restart in [`WriterJob::apply_measurement_event`]), or the
/// row failed outright and must be abandoned.
enum ApplyOutcome {
    NeedsColumn {
        name: Arc<str>,
        column_type: ColumnType,
    },
    Fatal(ingest_errors::IngestError),
}

fn apply_entities<W: crate::facade::TableWriter>(
    writer: &mut W,
    event: &MeasurementEvent,
) -> Result<(), ApplyOutcome> {
    for entity in &event.row.entities {
        let idx = match writer.column_index(&entity.column.name) {
            Some(idx) => idx,
            None => {
                return Err(ApplyOutcome::NeedsColumn {
                    name: Arc::clone(&entity.column.name),
                    column_type: entity.value.default_column_type(),
                })
            }
        };
        apply_entity_value(writer, idx, &entity.column.name, &entity.value).map_err(ApplyOutcome::Fatal)?;
    }
    Ok(())
}

fn apply_entity_value<W: crate::facade::TableWriter>(
    writer: &mut W,
    idx: usize,
    column_name: &str,
    value: &EntityValue,
) -> IngestResult<()> {
    let column_type = writer.column_type(idx);
    match (column_type, value) {
        (ColumnType::Symbol, EntityValue::Tag(v)) => {
            let sym = writer.resolve_symbol(idx, v)?;
            writer.put_symbol_index(idx, sym)
        }
        (ColumnType::Symbol, EntityValue::CachedTag(sym)) => writer.put_symbol_index(idx, *sym),
        (ColumnType::Long, EntityValue::Integer(v)) => writer.put_long(idx, *v),
        (ColumnType::Int, EntityValue::Integer(v)) => {
            let narrowed = i32::try_from(*v).map_err(|_| ingest_errors::IngestError::IntegerOutOfBounds {
                column: column_name.to_string(),
                target_type: "INT",
                value: *v,
            })?;
            writer.put_int(idx, narrowed)
        }
        (ColumnType::Short, EntityValue::Integer(v)) => {
            let narrowed = i16::try_from(*v).map_err(|_| ingest_errors::IngestError::IntegerOutOfBounds {
                column: column_name.to_string(),
                target_type: "SHORT",
                value: *v,
            })?;
            writer.put_short(idx, narrowed)
        }
        (ColumnType::Byte, EntityValue::Integer(v)) => {
            let narrowed = i8::try_from(*v).map_err(|_| ingest_errors::IngestError::IntegerOutOfBounds {
                column: column_name.to_string(),
                target_type: "BYTE",
                value: *v,
            })?;
            writer.put_byte(idx, narrowed)
        }
        (ColumnType::Timestamp, EntityValue::Integer(v)) | (ColumnType::Date, EntityValue::Integer(v)) => {
            writer.put_long(idx, *v)
        }
        (ColumnType::Double, EntityValue::Float(v)) => writer.put_double(idx, *v),
        (ColumnType::Float, EntityValue::Float(v)) => writer.put_float(idx, *v as f32),
        (ColumnType::Boolean, EntityValue::Boolean(v)) => writer.put_bool(idx, *v),
        (ColumnType::String, EntityValue::Str(v)) => writer.put_str(idx, v),
        (ColumnType::Long256, EntityValue::Long256(v)) => writer.put_long256(idx, v),
        (actual, _) => Err(ingest_errors::IngestError::TypeMismatch {
            column: column_name.to_string(),
            expected: expected_type_name(value),
            actual: column_type_name(actual),
        }),
    }
}

fn expected_type_name(value: &EntityValue) -> &'static str {
    match value {
        EntityValue::Tag(_) | EntityValue::CachedTag(_) => "SYMBOL",
        EntityValue::Integer(_) => "LONG",
        EntityValue::Float(_) => "DOUBLE",
        EntityValue::Str(_) => "STRING",
        EntityValue::Boolean(_) => "BOOLEAN",
        EntityValue::Long256(_) => "LONG256",
    }
}

fn column_type_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Symbol => "SYMBOL",
        ColumnType::Long => "LONG",
        ColumnType::Int => "INT",
        ColumnType::Short => "SHORT",
        ColumnType::Byte => "BYTE",
        ColumnType::Timestamp => "TIMESTAMP",
        ColumnType::Date => "DATE",
        ColumnType::Double => "DOUBLE",
        ColumnType::Float => "FLOAT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::String => "STRING",
        ColumnType::Long256 => "LONG256",
    }
}

impl<F: CatalogFacade> Runnable for WriterJob<F> {
    fn run(&mut self, _worker_id: usize) -> bool {
        // Clone the peeked event into an owned value before calling any
        // `&mut self` method: `peek` holds an immutable borrow rooted at
        // `self.consumer`, and `handle_event` needs `&mut self` for the
        // writers it may open, commit, or close.
        let Some(event) = self.consumer.peek().cloned() else {
            return false;
        };
        if self.handle_event(&event) {
            self.consumer.release();
            true
        } else {
            false
        }
    }

    fn close(&mut self) {
        for (name, mut owned) in self.owned.drain() {
            if let Err(err) = owned.writer.commit() {
                warn!(table = %name, error = %err, "final commit on shutdown failed");
            }
            if let Err(err) = owned.writer.close() {
                warn!(table = %name, error = %err, "close on shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ColumnRef, Entity, RowPayload};
    use crate::facade::EntityType;
    use crate::test_support::FakeCatalogFacade;
    use ingest_util::clock::FakeClock;

    fn event(table: &str, writer_thread: usize, ts: i64, entities: Vec<Entity>) -> MeasurementEvent {
        MeasurementEvent {
            kind: EventKind::Data,
            table: Arc::from(table),
            writer_thread,
            timestamp: Some(ts),
            row: RowPayload { entities },
        }
    }

    fn entity(name: &str, entity_type: EntityType, value: EntityValue) -> Entity {
        Entity {
            column: ColumnRef {
                name: Arc::from(name),
                index: None,
                entity_type,
            },
            value,
        }
    }

    #[test]
    fn applies_row_and_commits_at_threshold() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        let details = catalog.register_active("cpu", 0);
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();

        let mut config = IngestConfig::default();
        config.n_writer_threads = 1;
        config.max_uncommitted_rows = 1;
        let (_queue, mut consumers) =
            crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(0, Arc::clone(&facade), Arc::clone(&catalog), consumer, config, clock);

        let ev = event(
            "cpu",
            0,
            5_000,
            vec![entity(
                "usage",
                EntityType::Float,
                EntityValue::Float(3.5),
            )],
        );
        job.apply_measurement_event(&ev).unwrap();

        let rows = facade.committed_rows("cpu");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, 5_000);
        let _ = details;
    }

    #[test]
    fn events_for_tables_owned_elsewhere_are_ignored() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        catalog.register_active("cpu", 1); // owned by writer thread 1, not 0
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();

        let mut config = IngestConfig::default();
        config.n_writer_threads = 2;
        let (_queue, mut consumers) =
            crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(0, Arc::clone(&facade), catalog, consumer, config, clock);

        // addressed to writer thread 1, not this thread (0): `handle_event`
        // must filter it out without ever calling `apply_measurement_event`.
        let ev = event("cpu", 1, 5_000, vec![]);
        assert!(job.handle_event(&ev));
        assert!(job.owned.is_empty());
        assert!(facade.committed_rows("cpu").is_empty());
    }

    #[test]
    fn missing_column_cancels_and_restarts_row_instead_of_dropping_entities() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        catalog.register_active("cpu", 0);
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();

        let mut config = IngestConfig::default();
        config.n_writer_threads = 1;
        config.max_uncommitted_rows = 100;
        let (_queue, mut consumers) =
            crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(0, Arc::clone(&facade), catalog, consumer, config, clock);

        // neither `host` nor `usage` exists yet; both must survive the
        // cancel/reopen restart that `host`'s creation forces.
        let ev = event(
            "cpu",
            0,
            7,
            vec![
                entity("host", EntityType::Tag, EntityValue::Tag(Arc::from("a"))),
                entity("usage", EntityType::Float, EntityValue::Float(2.5)),
            ],
        );
        job.apply_measurement_event(&ev).unwrap();

        let writer = job.owned.get("cpu").unwrap();
        assert!(writer.writer.column_index("host").is_some());
        assert!(writer.writer.column_index("usage").is_some());
        assert_eq!(writer.writer.uncommitted_rows(), 1);
    }

    #[test]
    fn invalid_column_name_fails_the_row_instead_of_creating_it() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        catalog.register_active("cpu", 0);
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();

        let config = IngestConfig::default();
        let (_queue, mut consumers) =
            crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(0, Arc::clone(&facade), catalog, consumer, config, clock);

        let ev = event(
            "cpu",
            0,
            1,
            vec![entity(
                "bad name!",
                EntityType::Float,
                EntityValue::Float(1.0),
            )],
        );
        let err = job.apply_measurement_event(&ev).unwrap_err();
        assert!(matches!(err, IngestError::InvalidColumnName { .. }));
        assert!(facade.committed_rows("cpu").is_empty());
    }

    #[test]
    fn rebalance_handoff_waits_for_rows_published_before_the_decision() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        let details = catalog.register_active("cpu", 0);
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();

        let mut config = IngestConfig::default();
        config.n_writer_threads = 2;
        let (queue, mut consumers) = crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(
            0,
            Arc::clone(&facade),
            Arc::clone(&catalog),
            consumer,
            config,
            clock,
        );

        // a row lands on the queue before the rebalancer decides to move
        // this table elsewhere...
        let seq = queue.claim_blocking();
        queue.publish(seq, |e| {
            *e = event(
                "cpu",
                0,
                1,
                vec![entity("usage", EntityType::Float, EntityValue::Float(1.0))],
            );
        });

        // ...and only then does the decision land: an in-band Rebalance
        // event follows the backlog row in the same queue, then the
        // catalog's writer-thread assignment flips immediately.
        let handoff_done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seq = queue.claim_blocking();
        queue.publish(seq, |e| {
            e.reset_rebalance(Arc::from("cpu"), 0, 1, Arc::clone(&handoff_done));
        });
        details.set_writer_thread(1);

        // draining the backlog row first: it is still addressed to writer
        // thread 0 (fixed at publish time), so this thread must apply it
        // even though the catalog's assignment has already flipped.
        assert!(job.run(0));
        assert_eq!(facade.committed_rows("cpu").len(), 1);
        assert!(job.owned.contains_key("cpu"));
        assert!(!handoff_done.load(Ordering::Acquire));

        // the next event is the Rebalance itself; since this thread is
        // `from`, draining it closes the table out and sets the handshake
        // bit for `to`.
        assert!(job.run(0));
        assert!(!job.owned.contains_key("cpu"));
        assert!(handoff_done.load(Ordering::Acquire));
        assert_eq!(details.writer_thread(), 1);
    }

    #[test]
    fn a_row_older_than_the_partition_max_is_routed_through_the_merge_planner() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        catalog.register_active("cpu", 0);
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();

        let mut config = IngestConfig::default();
        config.n_writer_threads = 1;
        config.max_uncommitted_rows = 1;
        let (_queue, mut consumers) =
            crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(0, Arc::clone(&facade), catalog, consumer, config, clock);

        for ts in [100, 200, 300] {
            let ev = event(
                "cpu",
                0,
                ts,
                vec![entity("usage", EntityType::Float, EntityValue::Float(ts as f64))],
            );
            job.apply_measurement_event(&ev).unwrap();
        }
        assert_eq!(facade.ooo_merge_count("cpu"), 0);

        // 150 sorts behind the partition's max (300): must go through
        // `begin_ooo_merge` rather than a plain append.
        let ooo = event(
            "cpu",
            0,
            150,
            vec![entity("usage", EntityType::Float, EntityValue::Float(150.0))],
        );
        job.apply_measurement_event(&ooo).unwrap();

        assert_eq!(facade.ooo_merge_count("cpu"), 1);
        let rows = facade.committed_rows("cpu");
        assert_eq!(rows.len(), 4);
        let timestamps: Vec<i64> = rows.iter().map(|r| r.ts).collect();
        assert_eq!(timestamps, vec![100, 150, 200, 300]);
    }

    #[test]
    fn type_mismatch_is_reported_not_silently_dropped() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let catalog = Arc::new(Catalog::new());
        catalog.register_active("cpu", 0);
        facade
            .create_table("cpu", crate::config::PartitionBy::Day, true, 256)
            .unwrap();
        let writer = facade.get_writer("cpu").unwrap();
        drop(writer);

        let mut config = IngestConfig::default();
        config.n_writer_threads = 1;
        let (_queue, mut consumers) =
            crate::queue::DispatchQueue::<MeasurementEvent>::new(4, 1);
        let consumer = consumers.remove(0);
        let clock: Arc<dyn WallClock> = Arc::new(FakeClock::new(1_000));
        let mut job = WriterJob::new(0, Arc::clone(&facade), catalog, consumer, config, clock);

        // first row declares `usage` as a FLOAT column
        let ev1 = event(
            "cpu",
            0,
            1,
            vec![entity("usage", EntityType::Float, EntityValue::Float(1.0))],
        );
        job.apply_measurement_event(&ev1).unwrap();

        // second row tries to write a STRING into the same column
        let ev2 = event(
            "cpu",
            0,
            2,
            vec![entity(
                "usage",
                EntityType::String,
                EntityValue::Str(Arc::from("oops")),
            )],
        );
        let err = job.apply_measurement_event(&ev2).unwrap_err();
        assert!(matches!(
            err,
            ingest_errors::IngestError::TypeMismatch { .. }
        ));
    }
}
