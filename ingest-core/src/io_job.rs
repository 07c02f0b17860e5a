//! The network I/O thread's [`Runnable`]: drains incoming line-protocol
//! bytes, parses them into measurements, opportunistically resolves tag
//! values to symbol indices using this worker's own
//! [`ThreadLocalDetails`] cache, and routes the result to the
//! [`Scheduler`].

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use ingest_util::WallClock;
use tracing::warn;

use crate::catalog::ThreadLocalDetails;
use crate::config::IngestConfig;
use crate::event::{ColumnRef, Entity, EntityValue, RowPayload};
use crate::facade::{CatalogFacade, EntityType, LineParser, ParsedMeasurement, ParsedValue, SymbolTableLookup};
use crate::pool::Runnable;
use crate::scheduler::Scheduler;

/// Drains one connection-multiplexed inbox of raw bytes into the
/// scheduler.
///
/// Real network plumbing (accepting connections, reading sockets) lives
/// outside this crate; whatever owns the sockets is expected to push
/// received byte chunks into `inbox` (one sender per connection, fanned
/// into this worker's receiver) and this job does the rest: parsing,
/// affinity resolution, and dispatch.
pub struct NetworkIoJob<F: CatalogFacade> {
    scheduler: Arc<Scheduler<F>>,
    parser: Box<dyn LineParser>,
    symbol_lookup: Arc<dyn SymbolTableLookup>,
    local: ThreadLocalDetails,
    clock: Arc<dyn WallClock>,
    config: IngestConfig,
    inbox: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    last_maintenance_ms: i64,
}

impl<F: CatalogFacade> NetworkIoJob<F> {
    /// Builds an I/O job reading from `inbox`, parsing with `parser`, and
    /// dispatching through `scheduler`.
    pub fn new(
        scheduler: Arc<Scheduler<F>>,
        parser: Box<dyn LineParser>,
        symbol_lookup: Arc<dyn SymbolTableLookup>,
        clock: Arc<dyn WallClock>,
        config: IngestConfig,
        inbox: Receiver<Vec<u8>>,
    ) -> Self {
        NetworkIoJob {
            scheduler,
            parser,
            symbol_lookup,
            local: ThreadLocalDetails::new(),
            clock,
            config,
            inbox,
            buf: Vec::new(),
            last_maintenance_ms: 0,
        }
    }

    /// Converts one parsed measurement into a [`RowPayload`], resolving
    /// tag entities against this worker's local symbol cache where
    /// possible, and hands it to the scheduler.
    ///
    /// Resolves and caches the table's [`TableUpdateDetails`](crate::catalog::TableUpdateDetails)
    /// once per table rather than once per row: the first row after a cold
    /// cache (or after the catalog idled and later reactivated the table)
    /// pays a catalog lookup and registers this worker as a holder via
    /// `inc_io_holder`; every row after that reuses the cached handle and
    /// calls `Scheduler::commit_row` directly, skipping the repeat lookup
    /// `try_commit_row` would otherwise do.
    fn dispatch(&mut self, measurement: ParsedMeasurement) {
        let table: Arc<str> = Arc::from(measurement.table.as_str());
        let now_ms = self.clock.now_ms();
        let details = match self.local.get(&table, now_ms) {
            Some(details) => details,
            None => match self.scheduler.resolve_table(&table) {
                Ok(details) => {
                    details.inc_io_holder();
                    self.local.insert(&table, &details, now_ms);
                    details
                }
                Err(err) => {
                    warn!(%table, error = %err, "dropping row: table resolution failed");
                    return;
                }
            },
        };

        let capacity = self.config.default_symbol_capacity as usize;
        let mut entities = Vec::with_capacity(measurement.entities.len());
        for parsed in measurement.entities {
            let value = match parsed.value {
                ParsedValue::Tag(raw) => {
                    let cache = self.local.symbol_cache(&table, &parsed.name, capacity);
                    match cache.resolve_or_lookup(&table, &parsed.name, &raw, self.symbol_lookup.as_ref()) {
                        Some(id) => EntityValue::CachedTag(id),
                        None => EntityValue::Tag(Arc::from(raw)),
                    }
                }
                ParsedValue::CachedTag(id) => EntityValue::CachedTag(id),
                ParsedValue::Integer(v) => EntityValue::Integer(v),
                ParsedValue::Float(v) => EntityValue::Float(v),
                ParsedValue::Str(v) => EntityValue::Str(Arc::from(v)),
                ParsedValue::Boolean(v) => EntityValue::Boolean(v),
                ParsedValue::Long256(v) => EntityValue::Long256(Arc::from(v)),
            };
            entities.push(Entity {
                column: ColumnRef {
                    name: Arc::from(parsed.name.as_str()),
                    index: None,
                    entity_type: parsed.entity_type,
                },
                value,
            });
        }
        self.scheduler
            .commit_row(&details, measurement.timestamp, RowPayload { entities });
    }

    /// Periodically prunes this worker's local cache of tables whose
    /// catalog handle has died (idled elsewhere) or gone quiet, and — the
    /// idle-release side of the handoff — checks whether this worker was
    /// the sole remaining holder of a table it hasn't touched recently
    /// enough. If so, it idles the table in the catalog and publishes the
    /// `RELEASE_WRITER` control event every writer thread inspects; the one
    /// that currently owns the table commits and closes it out.
    ///
    /// Bounded to one stale table per tick (via `stale_details`, which finds
    /// without evicting) so a single maintenance pass cannot do unbounded
    /// work when many tables go quiet at once.
    fn maintenance_tick(&mut self) {
        let now_ms = self.clock.now_ms();
        if now_ms - self.last_maintenance_ms < self.config.maintenance_hysteresis_ms {
            return;
        }
        self.last_maintenance_ms = now_ms;
        let min_seen_ms = now_ms - self.config.min_idle_ms_before_writer_release;

        if let Some((table, details)) = self.local.stale_details(min_seen_ms) {
            if details.io_holder_count() == 1 {
                self.scheduler.catalog().idle(&details.name);
                self.scheduler.publish_release_writer(Arc::clone(&details.name));
            }
            details.dec_io_holder();
            self.local.remove(&table);
        }
        self.local.prune(min_seen_ms);
    }
}

impl<F: CatalogFacade> Runnable for NetworkIoJob<F> {
    fn run(&mut self, _worker_id: usize) -> bool {
        let mut progress = false;
        if let Ok(chunk) = self.inbox.try_recv() {
            self.buf.extend_from_slice(&chunk);
            progress = true;
        }
        loop {
            match self.parser.parse_next(&mut self.buf) {
                Ok(Some(measurement)) => {
                    self.dispatch(measurement);
                    progress = true;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "skipping unparsable measurement line");
                    progress = true;
                }
            }
        }
        self.maintenance_tick();
        progress
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::test_support::{FakeCatalogFacade, FakeSymbolTableLookup};
    use ingest_errors::IngestResult;
    use ingest_util::clock::FakeClock;
    use std::sync::mpsc::channel;

    /// A trivial parser that treats each newline-terminated chunk as
    /// `table,tag=value field=1.0` and yields one measurement per line.
    struct LineTestParser;
    impl LineParser for LineTestParser {
        fn parse_next(&mut self, buf: &mut Vec<u8>) -> IngestResult<Option<ParsedMeasurement>> {
            let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
            let mut parts = line.splitn(2, ' ');
            let measurement_part = parts.next().unwrap_or_default();
            let field_part = parts.next().unwrap_or_default();
            let mut mparts = measurement_part.splitn(2, ',');
            let table = mparts.next().unwrap_or_default().to_string();
            let mut entities = Vec::new();
            if let Some(tag) = mparts.next() {
                if let Some((k, v)) = tag.split_once('=') {
                    entities.push(crate::facade::ParsedEntity {
                        name: k.to_string(),
                        entity_type: EntityType::Tag,
                        value: ParsedValue::Tag(v.to_string()),
                    });
                }
            }
            if let Some((k, v)) = field_part.split_once('=') {
                entities.push(crate::facade::ParsedEntity {
                    name: k.to_string(),
                    entity_type: EntityType::Float,
                    value: ParsedValue::Float(v.parse().unwrap_or(0.0)),
                });
            }
            Ok(Some(ParsedMeasurement {
                table,
                timestamp: None,
                entities,
            }))
        }
    }

    #[test]
    fn parses_and_dispatches_a_full_line() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let mut config = IngestConfig::default();
        config.n_writer_threads = 1;
        let (scheduler, consumers) = Scheduler::new(Arc::clone(&facade), config.clone());
        let scheduler = Arc::new(scheduler);
        let (tx, rx) = channel();
        let mut job = NetworkIoJob::new(
            Arc::clone(&scheduler),
            Box::new(LineTestParser),
            Arc::new(FakeSymbolTableLookup::default()),
            Arc::new(FakeClock::new(1_000)),
            config,
            rx,
        );

        tx.send(b"cpu,host=web01 usage=3.5\n".to_vec()).unwrap();
        assert!(job.run(0));
        assert_eq!(consumers[0].peek().map(|e| e.table.to_string()), Some("cpu".to_string()));
    }

    #[test]
    fn partial_line_yields_no_progress_until_completed() {
        let facade = Arc::new(FakeCatalogFacade::default());
        let mut config = IngestConfig::default();
        config.n_writer_threads = 1;
        let (scheduler, _consumers) = Scheduler::new(Arc::clone(&facade), config.clone());
        let scheduler = Arc::new(scheduler);
        let (tx, rx) = channel();
        let mut job = NetworkIoJob::new(
            scheduler,
            Box::new(LineTestParser),
            Arc::new(FakeSymbolTableLookup::default()),
            Arc::new(FakeClock::new(1_000)),
            config,
            rx,
        );
        tx.send(b"cpu,host=web01 usage=3.5".to_vec()).unwrap();
        assert!(job.run(0)); // progress: received a chunk, even though no full line yet
        assert!(job.buf.ends_with(b"usage=3.5"));
    }
}
