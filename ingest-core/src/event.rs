//! The payload type carried end to end: from a network I/O worker, through
//! the dispatch ring, to the writer thread that owns the destination table.
//!
//! A [`MeasurementEvent`] is deliberately self-contained. It names its
//! destination table by value (not by a handle into the catalog) so that a
//! writer thread can look the table up itself after a rebalance moved it,
//! and it carries entities by value so the queue slot can be reused the
//! instant the writer has copied what it needs out of it.
//!
//! Besides ordinary data rows, the dispatch queue also carries the two
//! in-band control events every writer must inspect regardless of which
//! table or thread they're addressed to: [`EventKind::Rebalance`] and
//! [`EventKind::ReleaseWriter`]. Binding these to an exact position in the
//! queue's total order (rather than polling an out-of-band flag) is what
//! gives the rebalance handoff and idle release their cutover guarantee —
//! see `writer_job.rs`'s `drainQueue`-style dispatch.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::facade::{ColumnType, EntityType};

/// A column reference resolved once by the I/O worker and carried alongside
/// the raw value, so the writer thread does not need to re-run name
/// lookups for columns it has already seen.
///
/// `index` is only a hint: if the destination writer thread does not
/// recognize it (e.g. after a table was recreated), the writer falls back
/// to resolving `name` itself.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// The column name, exactly as declared on the wire.
    pub name: Arc<str>,
    /// The column index the producing I/O worker last observed for this
    /// name, or `None` if the column did not exist yet when this event was
    /// built.
    pub index: Option<usize>,
    /// The entity's declared type, used to create the column if it is
    /// missing on the writer side.
    pub entity_type: EntityType,
}

/// A decoded value ready to be applied to a writer's open row.
///
/// This is the queue-resident counterpart of
/// [`crate::facade::ParsedValue`]: where the parser's type is optimized for
/// decoding off the wire, this one is optimized for the writer's
/// type-dispatch switch, so `CachedTag` and `Tag` collapse into whichever
/// the I/O worker's symbol cache could resolve.
#[derive(Debug, Clone)]
pub enum EntityValue {
    /// A tag value, not resolved to a symbol index.
    Tag(Arc<str>),
    /// A tag value already resolved to a symbol index by the producing I/O
    /// worker's local symbol cache.
    CachedTag(i32),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(Arc<str>),
    /// Boolean.
    Boolean(bool),
    /// 256-bit hash, carried as a decoded UTF-8 string of hex digits.
    Long256(Arc<str>),
}

impl EntityValue {
    /// The column type this value would create on first use, matching
    /// [`EntityType::default_column_type`].
    pub fn default_column_type(&self) -> ColumnType {
        match self {
            EntityValue::Tag(_) | EntityValue::CachedTag(_) => ColumnType::Symbol,
            EntityValue::Integer(_) => ColumnType::Long,
            EntityValue::Float(_) => ColumnType::Double,
            EntityValue::Str(_) => ColumnType::String,
            EntityValue::Boolean(_) => ColumnType::Boolean,
            EntityValue::Long256(_) => ColumnType::Long256,
        }
    }
}

/// One column/value pair within a row.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Which column this value belongs to.
    pub column: ColumnRef,
    /// The value itself.
    pub value: EntityValue,
}

/// A single row's worth of entities, in wire order.
#[derive(Debug, Clone, Default)]
pub struct RowPayload {
    /// Tags and fields, in the order the parser encountered them.
    pub entities: Vec<Entity>,
}

/// The discriminant of a [`MeasurementEvent`], matching the design's
/// `MeasurementEvent.threadId` semantics: ordinarily a plain non-negative
/// writer-thread id addressing a data row, but two sentinel values turn the
/// event into an in-band control message every writer inspects regardless
/// of its own id.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Placeholder value a freshly allocated queue slot starts out holding.
    /// Never published; a writer that somehow observes one releases it
    /// without acting on it.
    Incomplete,
    /// An ordinary row, addressed to `MeasurementEvent::writer_thread`.
    Data,
    /// The scheduler has decided to move `table` from writer `from` to
    /// writer `to`. `handoff_done` is the handshake bit: `from` sets it
    /// (`Release`) once it has drained and committed every prior event for
    /// `table`; `to` must not apply, and must not release its cursor past,
    /// this event until it observes the bit set (`Acquire`). Binding the
    /// cutover to this exact queue position (rather than an independently
    /// polled flag) is what rules out the cross-cursor race where `to` runs
    /// ahead of `from` and silently skips a row neither writer ever applies.
    Rebalance {
        from: usize,
        to: usize,
        handoff_done: Arc<AtomicBool>,
    },
    /// A network I/O worker has determined it was the sole remaining
    /// holder of `table` and idled it. Every writer inspects this; whichever
    /// one currently owns `table` commits, closes, and drops it.
    ReleaseWriter,
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Incomplete
    }
}

/// One parsed, affinity-resolved measurement, ready for dispatch-queue
/// publication and, eventually, writer application — or one of the two
/// in-band control events described by [`EventKind`].
///
/// This is the `T` in [`crate::queue::DispatchQueue<T>`]: the object a
/// network I/O worker reserves a slot for, fills in place, and publishes;
/// and the object a writer thread reads out of its consumer cursor and
/// applies to the table it owns.
#[derive(Debug, Clone)]
pub struct MeasurementEvent {
    /// What kind of event this is.
    pub kind: EventKind,
    /// Destination table name.
    pub table: Arc<str>,
    /// The writer thread this event is addressed to. Meaningless for
    /// [`EventKind::Rebalance`] and [`EventKind::ReleaseWriter`], which
    /// every writer inspects regardless of this field. For
    /// [`EventKind::Data`], fixed at publish time to the table's
    /// `writer_thread()` as of that instant — not re-derived from a live
    /// catalog lookup when the event is later consumed, which is what
    /// keeps every writer's view of "whose row is this" consistent with
    /// the queue's own total order.
    pub writer_thread: usize,
    /// Row timestamp in microseconds since the epoch. `None` means "assign
    /// the receiver's wall-clock time on apply."
    pub timestamp: Option<i64>,
    /// The row's tags and fields.
    pub row: RowPayload,
}

impl Default for MeasurementEvent {
    /// An empty event addressed to no table. Only meaningful as the
    /// placeholder value a freshly allocated
    /// [`DispatchQueue`](crate::queue::DispatchQueue) slot starts out
    /// holding, before any producer has published into it.
    fn default() -> Self {
        MeasurementEvent::empty(Arc::from(""))
    }
}

impl MeasurementEvent {
    /// Builds an empty, unaddressed event. Used by the dispatch queue's
    /// slot initializer.
    pub fn empty(table: Arc<str>) -> Self {
        MeasurementEvent {
            kind: EventKind::Incomplete,
            table,
            writer_thread: 0,
            timestamp: None,
            row: RowPayload::default(),
        }
    }

    /// Clears this event in place and turns it into a data row, retaining
    /// the entities `Vec`'s allocation for reuse by the next producer to
    /// claim this slot.
    pub fn reset(&mut self, table: Arc<str>, writer_thread: usize, timestamp: Option<i64>) {
        self.kind = EventKind::Data;
        self.table = table;
        self.writer_thread = writer_thread;
        self.timestamp = timestamp;
        self.row.entities.clear();
    }

    /// Clears this event in place and turns it into a rebalance control
    /// event.
    pub fn reset_rebalance(&mut self, table: Arc<str>, from: usize, to: usize, handoff_done: Arc<AtomicBool>) {
        self.kind = EventKind::Rebalance { from, to, handoff_done };
        self.table = table;
        self.writer_thread = 0;
        self.timestamp = None;
        self.row.entities.clear();
    }

    /// Clears this event in place and turns it into a release-writer
    /// control event.
    pub fn reset_release_writer(&mut self, table: Arc<str>) {
        self.kind = EventKind::ReleaseWriter;
        self.table = table;
        self.writer_thread = 0;
        self.timestamp = None;
        self.row.entities.clear();
    }
}
