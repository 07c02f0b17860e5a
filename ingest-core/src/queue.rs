//! A fixed-capacity, multi-producer, broadcast-multi-consumer ring buffer.
//!
//! This is the dispatch path between network I/O workers and writer
//! threads: every [`MeasurementEvent`](crate::event::MeasurementEvent) an
//! I/O worker produces is claimed a slot in the ring, filled in place, and
//! published; every registered consumer independently reads and releases
//! every published slot in order. "Broadcast" here does not mean every
//! consumer receives every event's *payload* — the scheduler only ever
//! routes a given table to a single writer thread at a time — it means the
//! ring itself does not pick a consumer for a slot the way a work-stealing
//! queue would; each consumer inspects every slot and is expected to skip
//! (release without acting on) events addressed to a table it does not
//! currently own. This keeps the hand-off between writer threads during a
//! rebalance lock-free: the incoming writer thread starts reading from
//! wherever its cursor already is, rather than needing the ring to hand it
//! a particular slot.
//!
//! Producers never block: [`DispatchQueue::try_claim`] returns immediately
//! with a [`ClaimResult`] describing whether a slot was won, another
//! producer raced for the same slot and the caller should retry, or the
//! ring is saturated because the slowest consumer has not yet released far
//! enough. Saturation is a real backpressure signal, not an error: callers
//! are expected to spin briefly or yield and retry.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Outcome of a single non-blocking claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// A slot was claimed. Holds the sequence number (not the raw index)
    /// so the caller can hand it back unchanged to [`DispatchQueue::publish`].
    Slot(i64),
    /// Another producer claimed the slot this attempt raced for; retry.
    Contended,
    /// The ring is full: the slowest consumer has not released far enough
    /// for this slot to be safely overwritten. Retry after backing off.
    Full,
}

struct Slot<T> {
    /// Sequence number currently published in this slot, or `-1` if no
    /// generation has ever published here. Written with `Release` by the
    /// producer that fills the slot; read with `Acquire` by consumers
    /// before touching `value`, and by producers re-claiming the slot
    /// index for its next lap.
    published: CachePadded<AtomicI64>,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is mediated entirely through `published`'s
// Acquire/Release handshake: a producer only writes after winning the
// unique CAS for this slot's sequence number, and consumers only read
// after observing that sequence published. `T: Send` is required so the
// value can cross between the producing and consuming threads.
unsafe impl<T: Send> Sync for Slot<T> {}

struct DispatchQueueInner<T> {
    buffer: Box<[Slot<T>]>,
    mask: i64,
    capacity: i64,
    /// Last sequence number successfully claimed by any producer (i.e. the
    /// next slot to hand out is `claimed + 1`).
    claimed: CachePadded<AtomicI64>,
    /// Per-consumer cursor: the last sequence number that consumer has
    /// released. A consumer's next unread sequence is `cursor + 1`.
    consumer_cursors: Vec<CachePadded<AtomicI64>>,
}

impl<T> DispatchQueueInner<T> {
    fn min_consumer_cursor(&self) -> i64 {
        self.consumer_cursors
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .min()
            .unwrap_or(i64::MAX)
    }
}

/// A fixed-capacity broadcast ring, shared between its producer handles and
/// the consumer handles returned by [`DispatchQueue::new`].
pub struct DispatchQueue<T> {
    inner: Arc<DispatchQueueInner<T>>,
}

impl<T> Clone for DispatchQueue<T> {
    fn clone(&self) -> Self {
        DispatchQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A single consumer's read cursor into a [`DispatchQueue`].
///
/// Not `Clone`: each handle owns one slot in the ring's consumer-cursor
/// table, and only the thread holding it may advance it.
pub struct ConsumerHandle<T> {
    inner: Arc<DispatchQueueInner<T>>,
    index: usize,
}

impl<T> DispatchQueue<T>
where
    T: Default,
{
    /// Builds a ring of `capacity` slots (rounded up to the next power of
    /// two) with `n_consumers` independent read cursors, returning the
    /// producer-side queue and one handle per consumer.
    pub fn new(capacity: usize, n_consumers: usize) -> (Self, Vec<ConsumerHandle<T>>) {
        let capacity = capacity.next_power_of_two().max(1);
        let buffer = (0..capacity)
            .map(|_| Slot {
                published: CachePadded::new(AtomicI64::new(-1)),
                value: UnsafeCell::new(T::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let consumer_cursors = (0..n_consumers.max(1))
            .map(|_| CachePadded::new(AtomicI64::new(-1)))
            .collect();
        let inner = Arc::new(DispatchQueueInner {
            buffer,
            mask: capacity as i64 - 1,
            capacity: capacity as i64,
            claimed: CachePadded::new(AtomicI64::new(-1)),
            consumer_cursors,
        });
        let consumers = (0..n_consumers.max(1))
            .map(|index| ConsumerHandle {
                inner: Arc::clone(&inner),
                index,
            })
            .collect();
        (DispatchQueue { inner }, consumers)
    }
}

impl<T> DispatchQueue<T> {
    /// Ring capacity (a power of two).
    pub fn capacity(&self) -> usize {
        self.inner.capacity as usize
    }

    /// The sequence number of the last slot successfully claimed by any
    /// producer, or `-1` if none has been claimed yet. Used by the
    /// rebalancer to snapshot "everything published so far" so a losing
    /// writer thread knows exactly how far it must drain before handing a
    /// table off.
    pub fn tip(&self) -> i64 {
        self.inner.claimed.load(Ordering::Acquire)
    }

    /// Attempts to claim the next slot. Never blocks.
    pub fn try_claim(&self) -> ClaimResult {
        let current = self.inner.claimed.load(Ordering::Acquire);
        let next = current + 1;
        let min_consumer = self.inner.min_consumer_cursor();
        if next - min_consumer > self.inner.capacity {
            return ClaimResult::Full;
        }
        match self.inner.claimed.compare_exchange(
            current,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => ClaimResult::Slot(next),
            Err(_) => ClaimResult::Contended,
        }
    }

    /// Spins on [`try_claim`](Self::try_claim) until a slot is won,
    /// yielding the thread on each `Full` result. Used by call sites that
    /// have no cheaper way to apply backpressure than waiting.
    pub fn claim_blocking(&self) -> i64 {
        loop {
            match self.try_claim() {
                ClaimResult::Slot(seq) => return seq,
                ClaimResult::Contended => std::hint::spin_loop(),
                ClaimResult::Full => std::thread::yield_now(),
            }
        }
    }

    /// Runs `fill` against the freshly claimed slot's value in place, then
    /// publishes it, making it visible to every consumer. `seq` must be a
    /// sequence number this producer just won from [`try_claim`](Self::try_claim).
    ///
    /// # Panics
    /// Panics if `fill` panics; the slot is left unpublished, which
    /// permanently stalls the ring at that sequence. Callers must not let
    /// `fill` panic on realistic input.
    pub fn publish(&self, seq: i64, fill: impl FnOnce(&mut T)) {
        let idx = (seq & self.inner.mask) as usize;
        let slot = &self.inner.buffer[idx];
        // SAFETY: this producer uniquely won `seq` via `try_claim`'s CAS,
        // and the gating check there guarantees no consumer still holds an
        // unreleased reference to this slot's previous generation.
        let value = unsafe { &mut *slot.value.get() };
        fill(value);
        slot.published.store(seq, Ordering::Release);
    }
}

impl<T> ConsumerHandle<T> {
    /// The next sequence number this consumer has not yet read.
    fn next_seq(&self) -> i64 {
        self.inner.consumer_cursors[self.index].load(Ordering::Relaxed) + 1
    }

    /// Returns a reference to the next unread slot without advancing this
    /// consumer's cursor, or `None` if the producer has not published that
    /// far yet. Call [`release`](Self::release) after the caller is done
    /// with the reference to make its slot eligible for reuse.
    pub fn peek(&self) -> Option<&T> {
        let seq = self.next_seq();
        let idx = (seq & self.inner.mask) as usize;
        let slot = &self.inner.buffer[idx];
        if slot.published.load(Ordering::Acquire) != seq {
            return None;
        }
        // SAFETY: `published == seq` synchronizes-with the producer's
        // Release store in `publish`, so the write to `value` happens
        // before this read.
        Some(unsafe { &*slot.value.get() })
    }

    /// Advances this consumer's cursor past the slot last returned by
    /// [`peek`](Self::peek), allowing producers to reuse it once every
    /// other consumer has also released it.
    pub fn release(&self) {
        self.inner.consumer_cursors[self.index].fetch_add(1, Ordering::Release);
    }

    /// Convenience wrapper combining [`peek`](Self::peek) and
    /// [`release`](Self::release): calls `f` with the next unread value (if
    /// any) and releases it immediately after.
    pub fn consume_next<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let result = self.peek().map(f);
        if result.is_some() {
            self.release();
        }
        result
    }

    /// This consumer's current cursor position, for diagnostics and the
    /// idle-release maintenance pass.
    pub fn cursor(&self) -> i64 {
        self.inner.consumer_cursors[self.index].load(Ordering::Acquire)
    }
}
