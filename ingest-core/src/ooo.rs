//! Out-of-order partition merge planning.
//!
//! When a batch of incoming rows for a partition is not entirely after the
//! partition's existing maximum timestamp, the rows cannot simply be
//! appended: the merge planner decides which existing rows can be left
//! alone, which must be interleaved with incoming rows by timestamp, and
//! how large each resulting column file needs to be, before any bytes are
//! actually copied. Execution of the plan (the actual byte copying) is
//! farmed out to a bounded worker pool via [`crate::workqueue::CopyTaskQueue`],
//! with inline execution as a mandatory fallback when that queue is full —
//! a copy task is never dropped, only ever run on a different thread than
//! originally intended.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ingest_errors::IngestResult;
use parking_lot::{Condvar, Mutex};

use crate::facade::{ColumnType, FileIo, FileSlot};
use crate::workqueue::CopyTaskQueue;

/// One contiguous run of destination rows and where their data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBlock {
    /// Rows `[lo, hi]` (inclusive, 0-based) of the partition's existing
    /// column data, copied verbatim.
    Data { lo: i64, hi: i64 },
    /// Rows `[lo, hi]` (inclusive, 0-based) of the incoming sorted batch,
    /// copied verbatim.
    Oo { lo: i64, hi: i64 },
    /// Existing rows `[existing_lo, existing_hi]` interleaved by
    /// timestamp with incoming rows `[oo_lo, oo_hi]`. Both ranges are
    /// inclusive and 0-based into their respective sources.
    Merge {
        existing_lo: i64,
        existing_hi: i64,
        oo_lo: i64,
        oo_hi: i64,
    },
}

impl MergeBlock {
    /// Number of destination rows this block contributes.
    pub fn dst_row_count(&self) -> i64 {
        match *self {
            MergeBlock::Data { lo, hi } | MergeBlock::Oo { lo, hi } => hi - lo + 1,
            MergeBlock::Merge {
                existing_lo,
                existing_hi,
                oo_lo,
                oo_hi,
            } => (existing_hi - existing_lo + 1) + (oo_hi - oo_lo + 1),
        }
    }
}

/// A complete plan for merging one incoming sorted batch into one existing
/// partition: a sequence of blocks covering, in destination order, every
/// row the resulting partition will contain.
///
/// Named `prefix`/`merge`/`suffix` in the source this was distilled from,
/// each typed `{ NONE, OO, DATA, MERGE }`; here a block simply is or is not
/// present in `blocks`; "NONE" is the absence of an entry rather than a
/// variant, since an empty slot carries no data a downstream copy task
/// would ever need to act on.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub blocks: Vec<MergeBlock>,
    pub dst_row_count: i64,
}

/// Plans how `oo_ts` (already sorted ascending) merges into a partition
/// whose existing rows have timestamps `existing_ts` (also sorted
/// ascending).
///
/// Once any overlap is found, every remaining existing row from the first
/// overlapping position onward is folded into a single [`MergeBlock::Merge`]
/// together with the entire incoming batch, rather than splitting out a
/// trailing `suffix` block for existing rows after the last out-of-order
/// timestamp. Destination row count and total column byte size are
/// identical either way; this implementation simply does not attempt the
/// finer-grained three-way split.
pub fn plan_merge(existing_ts: &[i64], oo_ts: &[i64]) -> MergePlan {
    if oo_ts.is_empty() {
        return plan_merge_from_counts(existing_ts.len() as i64, existing_ts.len() as i64, 0);
    }
    let prefix_count = existing_ts.partition_point(|&ts| ts < oo_ts[0]) as i64;
    plan_merge_from_counts(existing_ts.len() as i64, prefix_count, oo_ts.len() as i64)
}

/// The production-callable core [`plan_merge`] is a thin wrapper over:
/// plans a merge from row counts alone rather than an in-memory timestamp
/// slice, so a real `TableWriter` can supply `prefix_count` from its own
/// index (e.g. a binary search over the `.d`/`.i` files' timestamp column)
/// without ever materialising the partition's full timestamp array.
///
/// `prefix_count` must equal the number of the partition's existing rows
/// (out of `existing_row_count`) whose timestamp sorts strictly before the
/// incoming batch's minimum timestamp.
pub fn plan_merge_from_counts(existing_row_count: i64, prefix_count: i64, oo_row_count: i64) -> MergePlan {
    let dst_row_count = existing_row_count + oo_row_count;

    if oo_row_count == 0 {
        let blocks = if existing_row_count == 0 {
            Vec::new()
        } else {
            vec![MergeBlock::Data {
                lo: 0,
                hi: existing_row_count - 1,
            }]
        };
        return MergePlan {
            blocks,
            dst_row_count,
        };
    }

    if existing_row_count == 0 {
        return MergePlan {
            blocks: vec![MergeBlock::Oo {
                lo: 0,
                hi: oo_row_count - 1,
            }],
            dst_row_count,
        };
    }

    let mut blocks = Vec::with_capacity(2);
    if prefix_count == existing_row_count {
        // entirely disjoint: the whole incoming batch sorts after every
        // existing row, so no interleaving is needed at all.
        blocks.push(MergeBlock::Data {
            lo: 0,
            hi: existing_row_count - 1,
        });
        blocks.push(MergeBlock::Oo {
            lo: 0,
            hi: oo_row_count - 1,
        });
    } else {
        if prefix_count > 0 {
            blocks.push(MergeBlock::Data {
                lo: 0,
                hi: prefix_count - 1,
            });
        }
        blocks.push(MergeBlock::Merge {
            existing_lo: prefix_count,
            existing_hi: existing_row_count - 1,
            oo_lo: 0,
            oo_hi: oo_row_count - 1,
        });
        metrics::counter!("ingest_ooo_merges_total").increment(1);
    }

    MergePlan {
        blocks,
        dst_row_count,
    }
}

/// Which of the five caller-selected merge-planner modes a partition
/// rewrite runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// OOO batch lands in an already-closed, non-last partition, entirely
    /// after its existing rows: a plain append, no interleaving.
    OpenMidPartitionForAppend,
    /// Same, but the partition is the currently open ("last") one.
    OpenLastPartitionForAppend,
    /// OOO batch overlaps a closed, non-last partition's existing rows and
    /// must be interleaved.
    OpenMidPartitionForMerge,
    /// OOO batch overlaps the last (currently open) partition's existing
    /// rows and must be interleaved.
    OpenLastPartitionForMerge,
    /// OOO batch sorts entirely before every existing partition; a new
    /// partition is opened to hold it.
    OpenNewPartitionForAppend,
}

/// Picks the mode a partition rewrite runs under.
pub fn choose_mode(is_last_partition: bool, is_new_partition: bool, needs_merge: bool) -> MergeMode {
    if is_new_partition {
        return MergeMode::OpenNewPartitionForAppend;
    }
    match (is_last_partition, needs_merge) {
        (true, true) => MergeMode::OpenLastPartitionForMerge,
        (true, false) => MergeMode::OpenLastPartitionForAppend,
        (false, true) => MergeMode::OpenMidPartitionForMerge,
        (false, false) => MergeMode::OpenMidPartitionForAppend,
    }
}

/// Path of a column's `.top` file: the marker recording a late-added
/// column's `srcDataTop` when the top region is left in place rather than
/// extended downward.
pub fn column_top_path(partition_dir: &Path, column: &str) -> PathBuf {
    partition_dir.join(format!("{column}.top"))
}

/// Path of the temporary `.<txn>/` directory a merge rewrites into, before
/// an atomic rename swaps it in over the original partition directory.
pub fn merge_dir_path(partition_dir: &Path, txn: u64) -> PathBuf {
    let name = partition_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    partition_dir.with_file_name(format!("{name}.{txn}"))
}

/// Finds the byte offset in a variable-width column's `.d` file at which
/// new data should be appended, by reading the one index entry every `.i`
/// file carries past its `row_count` per-row entries — an exclusive "end of
/// data" offset, written alongside the row before it.
pub fn var_column_append_offset<IO: FileIo>(io: &IO, index_fd: IO::Fd, row_count: i64) -> IngestResult<u64> {
    let mut buf = [0u8; 8];
    let offset = (row_count as u64) * 8;
    io.read(index_fd, &mut buf, offset)?;
    Ok(u64::from_le_bytes(buf))
}

/// Describes the "extend source column downward" handling required when a
/// late-added column's `srcDataTop > 0` and the incoming batch would
/// overwrite the top region: the source is remapped to hold
/// `null_rows + existing bytes`, the new low region is filled with
/// `null_value_for`, and the original bytes are copied back in starting at
/// `shifted_original_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopExtension {
    /// Row count the null-filled low region must cover (`srcDataTop`).
    pub null_rows: i64,
    /// Byte offset, in the remapped source, at which the original bytes
    /// now begin.
    pub shifted_original_offset: i64,
    /// For variable-width columns, fixed-size index entries must
    /// additionally be shifted by this many reference units (`-srcDataTop`).
    pub index_shift: i64,
}

/// Decides whether `srcDataTop` must be handled by extending the source
/// column downward (returning `Some`) or by writing a new `column.top` file
/// and leaving the data in place (`None`).
///
/// Per §4.5: extension is required whenever the new data would overwrite
/// the top region, i.e. `src_data_top > prefix_hi` or the prefix itself is
/// not a plain `DATA` block (`prefix_hi` is `-1` when there is no prefix
/// block at all).
pub fn top_extension(src_data_top: i64, prefix_hi: i64, prefix_is_data: bool, elem_size: i64) -> Option<TopExtension> {
    if src_data_top <= 0 {
        return None;
    }
    if !(src_data_top > prefix_hi || !prefix_is_data) {
        return None;
    }
    Some(TopExtension {
        null_rows: src_data_top,
        shifted_original_offset: src_data_top * elem_size,
        index_shift: -src_data_top,
    })
}

/// Storage length in bytes of one `STRING` cell, UTF-16-encoded with a
/// 4-byte length prefix (QuestDB's VARCHAR-predecessor string column
/// format): 2 bytes per UTF-16 code unit plus the 4-byte header.
pub fn string_storage_len(utf16_units: usize) -> usize {
    4 + 2 * utf16_units
}

/// Storage length in bytes of one `BINARY`/`LONG256`-as-bytes cell: an
/// 8-byte length prefix plus the raw bytes.
pub fn binary_storage_len(byte_len: usize) -> usize {
    8 + byte_len
}

/// Sums the variable-width storage length, in bytes, that a [`MergePlan`]'s
/// blocks require for one column, given that column's per-row storage
/// length in the existing partition and in the incoming batch.
///
/// `existing_len` and `oo_len` must be indexed the same way as the
/// `existing_ts`/`oo_ts` slices [`plan_merge`] was called with.
pub fn var_column_dst_len(plan: &MergePlan, existing_len: &[usize], oo_len: &[usize]) -> usize {
    plan.blocks
        .iter()
        .map(|block| match *block {
            MergeBlock::Data { lo, hi } => existing_len[lo as usize..=hi as usize].iter().sum(),
            MergeBlock::Oo { lo, hi } => oo_len[lo as usize..=hi as usize].iter().sum(),
            MergeBlock::Merge {
                existing_lo,
                existing_hi,
                oo_lo,
                oo_hi,
            } => {
                let e: usize = existing_len[existing_lo as usize..=existing_hi as usize]
                    .iter()
                    .sum();
                let o: usize = oo_len[oo_lo as usize..=oo_hi as usize].iter().sum();
                e + o
            }
        })
        .sum()
}

/// Destination row count for a fixed-width column append, per the merge
/// planner's size law: the OOO range plus every existing row below
/// `srcDataTop` (the rows-prefix-of-nulls belonging to a column added
/// partway through the partition's life are not physically stored and so
/// are not copied).
pub fn fixed_width_dst_len(oo_lo: i64, oo_hi: i64, src_data_max: i64, src_data_top: i64) -> i64 {
    (oo_hi - oo_lo + 1) + (src_data_max - src_data_top)
}

/// First destination append offset for a fixed-width column: the byte
/// offset at which the `prefix` block's copy ends and the `merge` block's
/// begins, in units of `elem_size` (`sizeof(ref)` in the source this was
/// distilled from).
pub fn dst_fix_append_offset1(prefix_lo: i64, prefix_hi: i64, top_adjustment: i64, elem_size: i64) -> i64 {
    (prefix_hi - prefix_lo + 1 - top_adjustment) * elem_size
}

/// Second destination append offset: where the `suffix` block (if any)
/// begins, immediately after the `merge` block's `merge_len` rows.
pub fn dst_fix_append_offset2(offset1: i64, merge_len: i64, elem_size: i64) -> i64 {
    offset1 + merge_len * elem_size
}

/// The bit pattern or sentinel value a freshly added column's backfilled
/// rows are written with, per storage type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NullValue {
    Long(i64),
    Int(i32),
    Short(i16),
    Byte(i8),
    Double(f64),
    Float(f32),
    Bool(bool),
    /// Variable-length columns (`STRING`, `LONG256`-as-string) encode null
    /// as a length-prefix sentinel rather than a fixed bit pattern.
    VariableLengthAbsent,
}

/// The null representation for `column_type`, used when a column is added
/// partway through a partition and existing rows must be backfilled, or
/// when extending a source column downward to make room for a shifted
/// `column.top`.
pub fn null_value_for(column_type: ColumnType) -> NullValue {
    match column_type {
        ColumnType::Symbol => NullValue::Int(-1),
        ColumnType::Long | ColumnType::Timestamp | ColumnType::Date => NullValue::Long(i64::MIN),
        ColumnType::Int => NullValue::Int(i32::MIN),
        ColumnType::Short => NullValue::Short(0),
        ColumnType::Byte => NullValue::Byte(0),
        ColumnType::Double => NullValue::Double(f64::NAN),
        ColumnType::Float => NullValue::Float(f32::NAN),
        ColumnType::Boolean => NullValue::Bool(false),
        ColumnType::String | ColumnType::Long256 => NullValue::VariableLengthAbsent,
    }
}

/// Shared completion bookkeeping for one partition rewrite.
///
/// Every copy task spawned for every block of every column in the rewrite
/// holds a clone of the same `RewriteCounters`, so whichever task happens
/// to finish last triggers finalisation without any dedicated coordinator
/// thread: `block_done` decrements the column counter, and when a column's
/// counter reaches zero its sources may be unmapped and the part counter
/// decrements in turn; when the part counter reaches zero the whole
/// rewritten partition may be swapped in, and any thread blocked in
/// [`wait`](Self::wait) is released.
#[derive(Clone)]
pub struct RewriteCounters {
    column_counter: Arc<AtomicUsize>,
    part_counter: Arc<AtomicUsize>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl RewriteCounters {
    /// `n_blocks` is this column's non-NONE block count; `n_columns` is the
    /// number of columns participating in the partition rewrite.
    pub fn new(n_blocks: usize, n_columns: usize) -> Self {
        RewriteCounters {
            column_counter: Arc::new(AtomicUsize::new(n_blocks)),
            part_counter: Arc::new(AtomicUsize::new(n_columns)),
            done: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Remaining blocks for this column.
    pub fn column_counter(&self) -> usize {
        self.column_counter.load(Ordering::Acquire)
    }

    /// Remaining columns for this partition rewrite.
    pub fn part_counter(&self) -> usize {
        self.part_counter.load(Ordering::Acquire)
    }

    /// Call once a single block's copy task finishes. Returns `true` if
    /// this call observed the column counter reach zero (the column's
    /// sources may now be unmapped) and, in that case, additionally
    /// decrements the part counter, returning whether *that* also reached
    /// zero (the partition may now be swapped in).
    pub fn block_done(&self) -> (bool, bool) {
        let column_done = self.column_counter.fetch_sub(1, Ordering::AcqRel) == 1;
        if !column_done {
            return (false, false);
        }
        let part_done = self.part_counter.fetch_sub(1, Ordering::AcqRel) == 1;
        if part_done {
            let (lock, cvar) = &*self.done;
            *lock.lock() = true;
            cvar.notify_all();
        }
        (true, part_done)
    }

    /// Blocks the calling thread until the partition rewrite this counter
    /// belongs to has fully completed.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.done;
        let mut done = lock.lock();
        while !*done {
            cvar.wait(&mut done);
        }
    }
}

/// One column's worth of copy work for a single [`MergeBlock`], queued for
/// (or run by) a copy-task worker.
///
/// Source descriptors may be [`FileSlot::borrowed`] when they point at a
/// partition already mapped by the active writer (the source this was
/// distilled from signals this by passing the fd as a negative value;
/// here it is the explicit `owning: false` tag instead), so the copy
/// executor must never close a source it does not own.
pub struct OooCopyDescriptor<Fd> {
    pub table: Arc<str>,
    pub column: Arc<str>,
    pub block: MergeBlock,

    /// Fixed-width source file (or the `.d` data file's fixed-size index
    /// region, for variable-width columns).
    pub src_fix: FileSlot<Fd>,
    /// Variable-width source data file, if this column is STRING/BINARY.
    pub src_var: Option<FileSlot<Fd>>,
    /// Byte offset into `src_fix` (and `src_var`, for variable-width
    /// columns) this block reads from.
    pub src_offset: u64,

    /// Destination fixed-width file.
    pub dst_fix: FileSlot<Fd>,
    /// Destination variable-width data file, if this column is
    /// STRING/BINARY.
    pub dst_var: Option<FileSlot<Fd>>,
    /// Byte offset into `dst_fix` this block's copy starts at —
    /// `dstFixAppendOffset1`/`dstFixAppendOffset2` for the non-first
    /// blocks of a column, `0` for the first.
    pub dst_offset: u64,
    /// Number of bytes this block writes into `dst_fix` (and the
    /// corresponding variable-length total into `dst_var`).
    pub dst_size: u64,

    /// Key/value file pair for this column's index, if it is indexed.
    pub index_kv: Option<(FileSlot<Fd>, FileSlot<Fd>)>,

    /// Shared reference counters for the partition rewrite this task is
    /// one block of.
    pub counters: RewriteCounters,
}

/// Executes a single queued or inline-fallback copy task.
///
/// Implementations perform the actual byte copying against a
/// [`crate::facade::FileIo`]; kept as a trait so the planner's publish
/// path can be tested without real files.
pub trait CopyExecutor<Fd>: Send + Sync {
    fn execute(&self, descriptor: &OooCopyDescriptor<Fd>) -> IngestResult<()>;
}

/// Publishes one copy task to `queue`, falling back to running it inline
/// via `executor` if the queue is momentarily full. This is what
/// guarantees forward progress for the merge: a saturated copy-task queue
/// slows the calling writer thread down (it does the copy itself) but
/// never causes a task to be silently dropped. Either way,
/// [`RewriteCounters::block_done`] must be called by the executor once the
/// copy actually lands, whichever thread ends up running it.
pub fn publish_copy_task<Fd: Send + 'static>(
    queue: &CopyTaskQueue<OooCopyDescriptor<Fd>>,
    executor: &dyn CopyExecutor<Fd>,
    descriptor: OooCopyDescriptor<Fd>,
) -> IngestResult<()> {
    match queue.try_push(descriptor) {
        Ok(()) => Ok(()),
        Err(descriptor) => {
            metrics::counter!("ingest_ooo_inline_copy_total").increment(1);
            executor.execute(&descriptor)
        }
    }
}
