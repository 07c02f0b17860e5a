//! The worker-pool harness shared by network I/O workers, writer threads,
//! and out-of-order copy-task workers.
//!
//! Every job in this crate (`NetworkIoJob`, `WriterJob`, the copy-task
//! worker loop) implements [`Runnable`] and is driven by an identical
//! tight loop: keep calling `run` while it reports there was work to do,
//! back off briefly when it reports idle, and call `close` once on the way
//! out. Centralizing that loop here means every worker kind gets the same
//! shutdown and backoff behavior without repeating it three times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

/// One unit of repeatable work, driven by a [`WorkerPool`] thread.
pub trait Runnable: Send + 'static {
    /// Does one pass of work. Returns `true` if it made progress (so the
    /// pool should call it again immediately) or `false` if it found
    /// nothing to do (so the pool should briefly back off before retrying).
    ///
    /// `worker_id` is this runnable's index within its pool, stable for
    /// the runnable's lifetime. Implementations use it to pick a
    /// deterministic slice of shared work (e.g. "writer thread 2 only
    /// looks at tables whose affinity hash says 2").
    fn run(&mut self, worker_id: usize) -> bool;

    /// Called exactly once, after the pool has been told to stop and this
    /// runnable's thread has returned from `run` for the last time. Used
    /// to flush and release any resources the runnable still holds.
    fn close(&mut self);
}

/// A fixed-size pool of OS threads, each driving its own [`Runnable`].
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns one thread per entry in `runnables`, each named `name-<i>`
    /// and driving that entry's [`Runnable`] loop until [`stop`](Self::stop)
    /// is called. `idle_backoff` bounds how long a thread sleeps after a
    /// `run` call returns `false`.
    pub fn spawn<R>(name: &str, runnables: Vec<R>, idle_backoff: Duration) -> Self
    where
        R: Runnable,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handles = runnables
            .into_iter()
            .enumerate()
            .map(|(worker_id, mut runnable)| {
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(format!("{name}-{worker_id}"))
                    .spawn(move || {
                        while !stop.load(Ordering::Relaxed) {
                            let made_progress = runnable.run(worker_id);
                            if !made_progress {
                                thread::park_timeout(idle_backoff);
                            }
                        }
                        debug!(worker_id, "worker stopping");
                        runnable.close();
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { stop, handles }
    }

    /// Signals every worker thread to stop after its current `run` call
    /// returns, then blocks until all of them have exited and called
    /// `close`.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            // unparked via the idle backoff's own timeout; no explicit
            // unpark needed since park_timeout always wakes eventually.
            if let Err(err) = handle.join() {
                warn!(?err, "worker thread panicked during shutdown");
            }
        }
    }

    /// Number of worker threads in this pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// `true` if this pool has no worker threads (never constructed with
    /// an empty runnable list in practice, but kept for completeness).
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
