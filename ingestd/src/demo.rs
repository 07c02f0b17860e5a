//! A minimal, explicitly non-production [`CatalogFacade`] and [`FileIo`]
//! pair, good enough to run the scheduler, writer pool, and merge-planner
//! worker pool end to end against real OS threads and a real (if tiny)
//! on-disk footprint.
//!
//! The real catalog and writer — the thing that actually lays out `.d`/`.i`
//! column files, partition directories, and symbol dictionaries on disk —
//! is a whole storage engine in its own right and lives outside this
//! workspace; [`ingest_core`] only defines the traits it is reached
//! through. This module exists so `ingestd` has something concrete to
//! plug into those traits for a local smoke test, the same way a
//! from-scratch crate's `examples/` binary stands up an in-memory
//! implementation of its own trait boundary rather than requiring a real
//! backend to demonstrate the wiring.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ingest_core::config::PartitionBy;
use ingest_core::facade::{CatalogFacade, ColumnType, FileIo, FileSlot, SymbolTableLookup, TableStatus, TableWriter};
use ingest_core::ooo::{publish_copy_task, CopyExecutor, OooCopyDescriptor, RewriteCounters};
use ingest_core::workqueue::CopyTaskQueue;
use ingest_errors::{internal, IngestError, IngestResult};

#[derive(Default)]
struct TableState {
    columns: Vec<(String, ColumnType)>,
    row_count: usize,
    committed: usize,
    /// Timestamp of every row appended so far, committed or not — enough
    /// to answer the merge planner's `max_timestamp`/`partition_row_count`/
    /// `partition_prefix_count` questions without a real column file.
    timestamps: Vec<i64>,
    ooo_merges: usize,
}

/// An in-memory table registry standing in for a real on-disk catalog.
/// Every table's rows live only in process memory; nothing survives a
/// restart. Good enough to exercise affinity routing, rebalancing, and
/// commit hysteresis without a storage engine behind it.
///
/// Still backed by a real [`DemoFileIo`] and [`CopyTaskQueue`] for the
/// merge planner's column files: a table's cell values are not stored, but
/// an out-of-order commit still opens real `<table>/<column>.d` files
/// under the data directory and publishes real copy tasks against them, so
/// the planner's wiring runs end to end rather than being a pure no-op.
pub struct DemoCatalogFacade {
    tables: Mutex<HashMap<String, Arc<Mutex<TableState>>>>,
    file_io: Arc<DemoFileIo>,
    copy_queue: Arc<CopyTaskQueue<OooCopyDescriptor<usize>>>,
    copy_executor: Arc<dyn CopyExecutor<usize>>,
}

impl DemoCatalogFacade {
    pub fn new(
        file_io: Arc<DemoFileIo>,
        copy_queue: Arc<CopyTaskQueue<OooCopyDescriptor<usize>>>,
        copy_executor: Arc<dyn CopyExecutor<usize>>,
    ) -> Self {
        DemoCatalogFacade {
            tables: Mutex::new(HashMap::new()),
            file_io,
            copy_queue,
            copy_executor,
        }
    }
}

impl CatalogFacade for DemoCatalogFacade {
    type Writer = DemoTableWriter;

    fn status(&self, name: &str) -> TableStatus {
        if self.tables.lock().unwrap().contains_key(name) {
            TableStatus::Exists
        } else {
            TableStatus::DoesNotExist
        }
    }

    fn create_table(
        &self,
        name: &str,
        _partition_by: PartitionBy,
        _symbol_cache: bool,
        _symbol_capacity: u32,
    ) -> IngestResult<()> {
        self.tables
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TableState::default())));
        Ok(())
    }

    fn get_writer(&self, name: &str) -> IngestResult<Self::Writer> {
        let tables = self.tables.lock().unwrap();
        let state = tables
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::WriterUnavailable {
                table: name.to_string(),
            })?;
        Ok(DemoTableWriter {
            state,
            open: None,
            name: Arc::from(name),
            file_io: Arc::clone(&self.file_io),
            copy_queue: Arc::clone(&self.copy_queue),
            copy_executor: Arc::clone(&self.copy_executor),
        })
    }
}

/// The writer handle backing [`DemoCatalogFacade`]: tracks column
/// metadata and row counts only, discarding cell values once a row is
/// appended. A real writer would serialize each cell into its column's
/// file at this point.
pub struct DemoTableWriter {
    state: Arc<Mutex<TableState>>,
    open: Option<i64>,
    name: Arc<str>,
    file_io: Arc<DemoFileIo>,
    copy_queue: Arc<CopyTaskQueue<OooCopyDescriptor<usize>>>,
    copy_executor: Arc<dyn CopyExecutor<usize>>,
}

impl TableWriter for DemoTableWriter {
    fn new_row(&mut self, ts: i64) -> IngestResult<()> {
        self.open = Some(ts);
        Ok(())
    }

    fn cancel_row(&mut self) {
        self.open = None;
    }

    fn append_row(&mut self) -> IngestResult<()> {
        let Some(ts) = self.open.take() else {
            return Err(internal!("append_row called with no open row"));
        };
        let mut state = self.state.lock().unwrap();
        state.row_count += 1;
        state.timestamps.push(ts);
        Ok(())
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.state
            .lock()
            .unwrap()
            .columns
            .iter()
            .position(|(n, _)| n == name)
    }

    fn column_type(&self, idx: usize) -> ColumnType {
        self.state.lock().unwrap().columns[idx].1
    }

    fn add_column(&mut self, name: &str, ty: ColumnType) -> IngestResult<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.columns.iter().position(|(n, _)| n == name) {
            return Ok(pos);
        }
        state.columns.push((name.to_string(), ty));
        Ok(state.columns.len() - 1)
    }

    fn resolve_symbol(&mut self, _idx: usize, _value: &str) -> IngestResult<i32> {
        Ok(0)
    }

    fn put_symbol_index(&mut self, _idx: usize, _sym_id: i32) -> IngestResult<()> {
        Ok(())
    }
    fn put_long(&mut self, _idx: usize, _v: i64) -> IngestResult<()> {
        Ok(())
    }
    fn put_int(&mut self, _idx: usize, _v: i32) -> IngestResult<()> {
        Ok(())
    }
    fn put_short(&mut self, _idx: usize, _v: i16) -> IngestResult<()> {
        Ok(())
    }
    fn put_byte(&mut self, _idx: usize, _v: i8) -> IngestResult<()> {
        Ok(())
    }
    fn put_double(&mut self, _idx: usize, _v: f64) -> IngestResult<()> {
        Ok(())
    }
    fn put_float(&mut self, _idx: usize, _v: f32) -> IngestResult<()> {
        Ok(())
    }
    fn put_bool(&mut self, _idx: usize, _v: bool) -> IngestResult<()> {
        Ok(())
    }
    fn put_str(&mut self, _idx: usize, _v: &str) -> IngestResult<()> {
        Ok(())
    }
    fn put_long256(&mut self, _idx: usize, _v: &str) -> IngestResult<()> {
        Ok(())
    }

    fn uncommitted_rows(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.row_count - state.committed
    }

    fn commit(&mut self) -> IngestResult<()> {
        let mut state = self.state.lock().unwrap();
        state.committed = state.row_count;
        Ok(())
    }

    fn commit_with_hysteresis(&mut self, _hysteresis_micros: i64) -> IngestResult<()> {
        self.commit()
    }

    fn close(&mut self) -> IngestResult<()> {
        self.open = None;
        Ok(())
    }

    fn max_timestamp(&self) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state.timestamps[..state.committed].iter().copied().max()
    }

    fn partition_row_count(&self) -> i64 {
        self.state.lock().unwrap().committed as i64
    }

    fn partition_prefix_count(&self, ts: i64) -> IngestResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.timestamps[..state.committed].iter().filter(|&&t| t < ts).count() as i64)
    }

    fn begin_ooo_merge(&mut self, plan: &ingest_core::ooo::MergePlan) -> IngestResult<()> {
        let columns: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let committed = state.committed;
            state.timestamps[..committed].sort_unstable();
            state.ooo_merges += 1;
            state.columns.iter().map(|(n, _)| n.clone()).collect()
        };

        // One copy task per block, per column: this demo façade never
        // tracks per-column byte layout, so every descriptor reads and
        // writes the same `<table>/<column>.d` file rather than a real
        // source/destination pair — enough to exercise the queue/executor
        // wiring end to end without modeling fixed/variable-width storage.
        let n_blocks = plan.blocks.len();
        if n_blocks == 0 || columns.is_empty() {
            return Ok(());
        }
        let counters = RewriteCounters::new(n_blocks, columns.len());
        for column in &columns {
            let path = format!("{}/{}.d", self.name, column);
            let fd = self.file_io.open_rw(&path)?;
            for block in &plan.blocks {
                let descriptor = OooCopyDescriptor {
                    table: Arc::clone(&self.name),
                    column: Arc::from(column.as_str()),
                    block: *block,
                    src_fix: FileSlot::borrowed(fd),
                    src_var: None,
                    src_offset: 0,
                    dst_fix: FileSlot::borrowed(fd),
                    dst_var: None,
                    dst_offset: 0,
                    dst_size: 0,
                    index_kv: None,
                    counters: counters.clone(),
                };
                publish_copy_task(&self.copy_queue, self.copy_executor.as_ref(), descriptor)?;
            }
        }
        tracing::debug!(
            table = %self.name,
            blocks = n_blocks,
            dst_row_count = plan.dst_row_count,
            "demo writer ran an out-of-order merge"
        );
        Ok(())
    }
}

/// A real-filesystem-backed [`FileIo`], rooted under a configurable data
/// directory, for the merge planner's copy-task executor.
pub struct DemoFileIo {
    root: PathBuf,
}

impl DemoFileIo {
    pub fn new(root: PathBuf) -> IngestResult<Self> {
        std::fs::create_dir_all(&root).map_err(|source| IngestError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(DemoFileIo { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileIo for DemoFileIo {
    type Fd = usize;

    fn open_rw(&self, path: &str) -> IngestResult<Self::Fd> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IngestError::Io {
                path: full.display().to_string(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&full)
            .map_err(|source| IngestError::Io {
                path: full.display().to_string(),
                source,
            })?;
        // Leaked intentionally: this demo façade never closes a borrowed
        // fd and keeps every opened file for the life of the process,
        // trading a handle leak for not needing a registry keyed by a
        // synthetic integer `Fd`.
        let raw = Box::into_raw(Box::new(file)) as usize;
        Ok(raw)
    }

    fn read(&self, fd: Self::Fd, buf: &mut [u8], offset: u64) -> IngestResult<usize> {
        let file = unsafe { &mut *(fd as *mut File) };
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read(buf))
            .map_err(|source| IngestError::Io {
                path: format!("fd {fd}"),
                source,
            })
    }

    fn write(&self, fd: Self::Fd, buf: &[u8], offset: u64) -> IngestResult<()> {
        let file = unsafe { &mut *(fd as *mut File) };
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(buf))
            .map_err(|source| IngestError::Io {
                path: format!("fd {fd}"),
                source,
            })
    }

    fn allocate(&self, fd: Self::Fd, len: u64) -> IngestResult<()> {
        let file = unsafe { &mut *(fd as *mut File) };
        file.set_len(len).map_err(|source| IngestError::Io {
            path: format!("fd {fd}"),
            source,
        })
    }

    fn close(&self, fd: Self::Fd) -> IngestResult<()> {
        // SAFETY: `fd` was produced by `open_rw`'s `Box::into_raw`; this is
        // the one call site allowed to reclaim it, and only for fds this
        // façade owns (callers must check `FileSlot::owning` first).
        unsafe {
            drop(Box::from_raw(fd as *mut File));
        }
        Ok(())
    }

    fn is_restricted_file_system(&self) -> bool {
        false
    }
}

/// A copy-task executor that records which blocks it was asked to copy
/// without moving any bytes. Wiring a byte-accurate executor requires
/// knowing each column's fixed-width element size and variable-width
/// encoding, which [`OooCopyDescriptor`] deliberately leaves to the caller
/// rather than modeling generically — exercising that path end to end
/// belongs to whatever owns the real column-file layout.
pub struct TracingCopyExecutor;

impl CopyExecutor<usize> for TracingCopyExecutor {
    fn execute(&self, descriptor: &OooCopyDescriptor<usize>) -> IngestResult<()> {
        tracing::debug!(
            table = %descriptor.table,
            column = %descriptor.column,
            ?descriptor.block,
            "executing out-of-order copy task"
        );
        descriptor.counters.block_done();
        Ok(())
    }
}

/// A [`SymbolTableLookup`] that never resolves anything, standing in for
/// a real tag dictionary. Every tag entity falls through to the
/// un-cached [`ingest_core::facade::ParsedValue::Tag`] path, which still
/// routes and applies correctly, just without the opportunistic
/// symbol-index fast path a real dictionary provides.
#[derive(Default)]
pub struct NullSymbolTableLookup;

impl SymbolTableLookup for NullSymbolTableLookup {
    fn lookup(&self, _table: &str, _column: &str, _value: &str) -> Option<i32> {
        None
    }
}
