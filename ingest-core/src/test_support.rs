//! In-memory fakes for every external trait in [`crate::facade`], used by
//! this crate's own unit and integration tests in place of a real
//! filesystem, network stack, or symbol dictionary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ingest_errors::{internal, IngestError, IngestResult};

use crate::config::PartitionBy;
use crate::facade::{CatalogFacade, ColumnType, FileIo, SymbolTableLookup, TableStatus, TableWriter};

#[derive(Debug, Clone, PartialEq)]
pub enum FakeCell {
    Symbol(i32),
    Long(i64),
    Int(i32),
    Short(i16),
    Byte(i8),
    Double(f64),
    Float(f32),
    Bool(bool),
    Str(String),
    Long256(String),
}

#[derive(Debug, Clone)]
pub struct FakeRow {
    pub ts: i64,
    pub cells: HashMap<usize, FakeCell>,
}

#[derive(Default)]
struct FakeTableState {
    partition_by: PartitionBy,
    columns: Vec<(String, ColumnType)>,
    rows: Vec<FakeRow>,
    committed: usize,
    symbols: HashMap<String, i32>,
    next_symbol_id: i32,
    ooo_merges: usize,
}

/// An in-memory stand-in for a real catalog + filesystem. Every table is
/// just a `Vec` of rows behind a mutex; good enough to exercise scheduling,
/// writer-apply, and rebalance logic without touching disk.
#[derive(Default)]
pub struct FakeCatalogFacade {
    tables: Mutex<HashMap<String, Arc<Mutex<FakeTableState>>>>,
    /// Table names present in this set fail every `get_writer` call with
    /// `WriterUnavailable`, simulating another process holding the lock.
    locked: Mutex<std::collections::HashSet<String>>,
}

impl FakeCatalogFacade {
    /// Marks `table` as held by another writer, so the next
    /// [`get_writer`](CatalogFacade::get_writer) call for it fails.
    pub fn lock_externally(&self, table: &str) {
        self.locked.lock().unwrap().insert(table.to_string());
    }

    /// Releases a lock set by [`lock_externally`](Self::lock_externally).
    pub fn unlock(&self, table: &str) {
        self.locked.lock().unwrap().remove(table);
    }

    /// Snapshot of every committed row currently stored for `table`, in
    /// append order.
    pub fn committed_rows(&self, table: &str) -> Vec<FakeRow> {
        let tables = self.tables.lock().unwrap();
        let Some(state) = tables.get(table) else {
            return Vec::new();
        };
        let state = state.lock().unwrap();
        state.rows[..state.committed].to_vec()
    }

    /// This table's column list, in creation order.
    pub fn columns(&self, table: &str) -> Vec<(String, ColumnType)> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|s| s.lock().unwrap().columns.clone())
            .unwrap_or_default()
    }

    /// Number of times `begin_ooo_merge` has been called for `table`.
    pub fn ooo_merge_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|s| s.lock().unwrap().ooo_merges)
            .unwrap_or(0)
    }
}

/// A writer handle over one [`FakeTableState`], mirroring the exclusivity a
/// real `TableWriter` would have: holding a `FakeTableWriter` means no
/// other code in this process is supposed to be touching the same table
/// concurrently, though nothing prevents it since this is a test fake.
pub struct FakeTableWriter {
    state: Arc<Mutex<FakeTableState>>,
    open: Option<FakeRow>,
}

impl TableWriter for FakeTableWriter {
    fn new_row(&mut self, ts: i64) -> IngestResult<()> {
        self.open = Some(FakeRow {
            ts,
            cells: HashMap::new(),
        });
        Ok(())
    }

    fn cancel_row(&mut self) {
        self.open = None;
    }

    fn append_row(&mut self) -> IngestResult<()> {
        let row = self
            .open
            .take()
            .ok_or_else(|| internal!("append_row called with no open row"))?;
        self.state.lock().unwrap().rows.push(row);
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

    fn resolve_symbol(&mut self, _idx: usize, value: &str) -> IngestResult<i32> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.symbols.get(value) {
            return Ok(*id);
        }
        let id = state.next_symbol_id;
        state.next_symbol_id += 1;
        state.symbols.insert(value.to_string(), id);
        Ok(id)
    }

    fn put_symbol_index(&mut self, idx: usize, sym_id: i32) -> IngestResult<()> {
        self.put(idx, FakeCell::Symbol(sym_id))
    }

    fn put_long(&mut self, idx: usize, v: i64) -> IngestResult<()> {
        self.put(idx, FakeCell::Long(v))
    }

    fn put_int(&mut self, idx: usize, v: i32) -> IngestResult<()> {
        self.put(idx, FakeCell::Int(v))
    }

    fn put_short(&mut self, idx: usize, v: i16) -> IngestResult<()> {
        self.put(idx, FakeCell::Short(v))
    }

    fn put_byte(&mut self, idx: usize, v: i8) -> IngestResult<()> {
        self.put(idx, FakeCell::Byte(v))
    }

    fn put_double(&mut self, idx: usize, v: f64) -> IngestResult<()> {
        self.put(idx, FakeCell::Double(v))
    }

    fn put_float(&mut self, idx: usize, v: f32) -> IngestResult<()> {
        self.put(idx, FakeCell::Float(v))
    }

    fn put_bool(&mut self, idx: usize, v: bool) -> IngestResult<()> {
        self.put(idx, FakeCell::Bool(v))
    }

    fn put_str(&mut self, idx: usize, v: &str) -> IngestResult<()> {
        self.put(idx, FakeCell::Str(v.to_string()))
    }

    fn put_long256(&mut self, idx: usize, v: &str) -> IngestResult<()> {
        self.put(idx, FakeCell::Long256(v.to_string()))
    }

    fn uncommitted_rows(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.rows.len() - state.committed
    }

    fn commit(&mut self) -> IngestResult<()> {
        let mut state = self.state.lock().unwrap();
        state.committed = state.rows.len();
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
        state.rows[..state.committed].iter().map(|r| r.ts).max()
    }

    fn partition_row_count(&self) -> i64 {
        self.state.lock().unwrap().committed as i64
    }

    fn partition_prefix_count(&self, ts: i64) -> IngestResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.rows[..state.committed].iter().filter(|r| r.ts < ts).count() as i64)
    }

    fn begin_ooo_merge(&mut self, plan: &crate::ooo::MergePlan) -> IngestResult<()> {
        let mut state = self.state.lock().unwrap();
        let mut committed: Vec<FakeRow> = state.rows[..state.committed].to_vec();
        committed.sort_by_key(|r| r.ts);
        state.rows.splice(..state.committed, committed);
        state.ooo_merges += 1;
        let _ = plan;
        Ok(())
    }
}

impl FakeTableWriter {
    fn put(&mut self, idx: usize, cell: FakeCell) -> IngestResult<()> {
        let row = self
            .open
            .as_mut()
            .ok_or_else(|| internal!("put called with no open row"))?;
        row.cells.insert(idx, cell);
        Ok(())
    }
}

impl CatalogFacade for FakeCatalogFacade {
    type Writer = FakeTableWriter;

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
        partition_by: PartitionBy,
        _symbol_cache: bool,
        _symbol_capacity: u32,
    ) -> IngestResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(FakeTableState {
                partition_by,
                ..Default::default()
            }))
        });
        Ok(())
    }

    fn get_writer(&self, name: &str) -> IngestResult<Self::Writer> {
        if self.locked.lock().unwrap().contains(name) {
            return Err(IngestError::WriterUnavailable {
                table: name.to_string(),
            });
        }
        let tables = self.tables.lock().unwrap();
        let state = tables
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::WriterUnavailable {
                table: name.to_string(),
            })?;
        Ok(FakeTableWriter { state, open: None })
    }
}

/// A symbol-table lookup fake backed by a shared, pre-seeded map.
#[derive(Default)]
pub struct FakeSymbolTableLookup {
    entries: Mutex<HashMap<(String, String, String), i32>>,
}

impl FakeSymbolTableLookup {
    pub fn seed(&self, table: &str, column: &str, value: &str, id: i32) {
        self.entries.lock().unwrap().insert(
            (table.to_string(), column.to_string(), value.to_string()),
            id,
        );
    }
}

impl SymbolTableLookup for FakeSymbolTableLookup {
    fn lookup(&self, table: &str, column: &str, value: &str) -> Option<i32> {
        self.entries
            .lock()
            .unwrap()
            .get(&(table.to_string(), column.to_string(), value.to_string()))
            .copied()
    }
}

/// An in-memory byte store standing in for a real filesystem, used by the
/// out-of-order merge planner's tests.
#[derive(Default)]
pub struct FakeFileIo {
    files: Mutex<HashMap<u64, Vec<u8>>>,
    next_fd: Mutex<u64>,
    restricted: bool,
}

impl FakeFileIo {
    pub fn restricted() -> Self {
        FakeFileIo {
            restricted: true,
            ..Default::default()
        }
    }

    /// Reads back the full current contents of `fd`, for assertions.
    pub fn contents(&self, fd: u64) -> Vec<u8> {
        self.files.lock().unwrap().get(&fd).cloned().unwrap_or_default()
    }
}

impl FileIo for FakeFileIo {
    type Fd = u64;

    fn open_rw(&self, _path: &str) -> IngestResult<Self::Fd> {
        let mut next = self.next_fd.lock().unwrap();
        let fd = *next;
        *next += 1;
        self.files.lock().unwrap().insert(fd, Vec::new());
        Ok(fd)
    }

    fn read(&self, fd: Self::Fd, buf: &mut [u8], offset: u64) -> IngestResult<usize> {
        let files = self.files.lock().unwrap();
        let data = files
            .get(&fd)
            .ok_or_else(|| internal!("read on unknown fake fd"))?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, fd: Self::Fd, buf: &[u8], offset: u64) -> IngestResult<()> {
        let mut files = self.files.lock().unwrap();
        let data = files
            .get_mut(&fd)
            .ok_or_else(|| internal!("write on unknown fake fd"))?;
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn allocate(&self, fd: Self::Fd, len: u64) -> IngestResult<()> {
        let mut files = self.files.lock().unwrap();
        let data = files
            .get_mut(&fd)
            .ok_or_else(|| internal!("allocate on unknown fake fd"))?;
        if (data.len() as u64) < len {
            data.resize(len as usize, 0);
        }
        Ok(())
    }

    fn close(&self, _fd: Self::Fd) -> IngestResult<()> {
        Ok(())
    }

    fn is_restricted_file_system(&self) -> bool {
        self.restricted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_write_then_commit_round_trips() {
        let facade = FakeCatalogFacade::default();
        facade
            .create_table("cpu", PartitionBy::Day, true, 256)
            .unwrap();
        let mut writer = facade.get_writer("cpu").unwrap();
        let idx = writer.add_column("usage", ColumnType::Double).unwrap();
        writer.new_row(1_000).unwrap();
        writer.put_double(idx, 42.5).unwrap();
        writer.append_row().unwrap();
        writer.commit().unwrap();

        let rows = facade.committed_rows("cpu");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, 1_000);
        assert_eq!(rows[0].cells.get(&idx), Some(&FakeCell::Double(42.5)));
    }

    #[test]
    fn locked_table_fails_get_writer() {
        let facade = FakeCatalogFacade::default();
        facade.create_table("cpu", PartitionBy::Day, true, 256).unwrap();
        facade.lock_externally("cpu");
        assert!(facade.get_writer("cpu").is_err());
        facade.unlock("cpu");
        assert!(facade.get_writer("cpu").is_ok());
    }

    #[test]
    fn fake_file_io_round_trips_writes() {
        let io = FakeFileIo::default();
        let fd = io.open_rw("x").unwrap();
        io.allocate(fd, 16).unwrap();
        io.write(fd, b"hello", 4).unwrap();
        let mut buf = [0u8; 5];
        io.read(fd, &mut buf, 4).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
