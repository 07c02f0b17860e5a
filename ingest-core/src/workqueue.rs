//! Bounded multi-producer, multi-consumer queue for out-of-order copy
//! tasks.
//!
//! Unlike [`crate::queue::DispatchQueue`], this queue does not need to be
//! lock-free: every call site that publishes a copy task also carries a
//! mandatory inline-execution fallback for when the queue is full (see
//! [`crate::ooo::OooMergePlanner::publish_copy_task`]), so contention here
//! costs throughput, never forward progress. A `parking_lot` mutex plus
//! condvar is the simplest correct thing that fits, and matches the
//! blocking-queue shape used elsewhere in this codebase for work that is
//! genuinely allowed to block.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A bounded FIFO queue of `T`, shared between producers and a worker pool
/// of consumers.
pub struct CopyTaskQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> CopyTaskQueue<T> {
    /// Creates a queue that holds at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        CopyTaskQueue {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Attempts to push `item` without blocking. Returns `Err(item)` if the
    /// queue is at capacity, so the caller can fall back to running the
    /// work inline.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the next item, blocking up to `timeout` if the queue is
    /// currently empty. Returns `None` on timeout or once the queue has
    /// been closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            let result = self.not_empty.wait_for(&mut state, timeout);
            if result.timed_out() && state.items.is_empty() {
                return None;
            }
        }
    }

    /// Signals that no further items will be pushed; wakes every consumer
    /// blocked in [`pop_timeout`](Self::pop_timeout) so they can observe
    /// the close and exit once the queue drains.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
    }

    /// Current queue length, for diagnostics.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// `true` if the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
