//! Daemon entry point: loads configuration, wires the catalog/dispatch
//! [`Scheduler`] to a worker pool per subsystem (network I/O, writer
//! threads, out-of-order copy tasks), and parks the main thread until the
//! process is killed.
//!
//! The catalog and file I/O backing this binary are the bundled
//! [`demo`] façade, not a real storage engine — see that module's docs
//! for why. Everything it plugs into ([`Scheduler`], [`WorkerPool`],
//! [`NetworkIoJob`], [`WriterJob`]) is the same trait-bounded wiring a
//! production deployment would use against a real catalog.

mod demo;

use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ingest_core::config::IngestConfig;
use ingest_core::io_job::NetworkIoJob;
use ingest_core::ooo::{CopyExecutor, OooCopyDescriptor};
use ingest_core::pool::{Runnable, WorkerPool};
use ingest_core::workqueue::CopyTaskQueue;
use ingest_core::writer_job::WriterJob;
use ingest_core::{IlpLineParser, Scheduler, SymbolTableLookup};
use ingest_util::clock::RealClock;
use ingest_util::WallClock;
use tracing_subscriber::EnvFilter;

use demo::{DemoCatalogFacade, DemoFileIo, NullSymbolTableLookup, TracingCopyExecutor};

/// Runs the ingestion scheduler against the bundled in-memory demo
/// catalog. Line-protocol bytes are expected to arrive through the
/// inbox channels this binary hands to its I/O workers; wiring those up
/// to a real listener is outside this crate's scope.
#[derive(Parser, Debug)]
#[command(version, about = None, long_about = None)]
struct Options {
    /// Path to a TOML configuration file. Any key the file omits (or
    /// the whole file, if this flag is absent) falls back to
    /// `IngestConfig::default()`.
    #[arg(long, env = "INGESTD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the demo file-I/O façade and copy-task executor treat
    /// as their data root.
    #[arg(long, env = "INGESTD_DATA_DIR", default_value = "./ingestd-data")]
    data_dir: PathBuf,

    /// Log filter, in `tracing_subscriber::EnvFilter` syntax.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,
}

fn load_config(options: &Options) -> anyhow::Result<IngestConfig> {
    match &options.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(IngestConfig::from_toml_str(&text)?)
        }
        None => Ok(IngestConfig::default()),
    }
}

/// Drains [`CopyTaskQueue`] and runs each descriptor through a
/// [`CopyExecutor`]. The writer threads' merge planner only ever queues
/// here as an optimization; a full queue means the planner already ran
/// the copy inline, so this worker exists purely to keep the common
/// case off the writer thread's hot path.
struct CopyWorker {
    queue: Arc<CopyTaskQueue<OooCopyDescriptor<usize>>>,
    executor: Arc<dyn CopyExecutor<usize>>,
}

impl Runnable for CopyWorker {
    fn run(&mut self, _worker_id: usize) -> bool {
        match self.queue.pop_timeout(Duration::from_millis(200)) {
            Some(descriptor) => {
                if let Err(err) = self.executor.execute(&descriptor) {
                    tracing::warn!(error = %err, "out-of-order copy task failed");
                }
                true
            }
            None => false,
        }
    }

    fn close(&mut self) {}
}

fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    let filter = EnvFilter::try_new(&options.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&options)?;
    tracing::info!(?config, "starting ingestion daemon");

    let file_io = Arc::new(DemoFileIo::new(options.data_dir.clone())?);
    let copy_queue = Arc::new(CopyTaskQueue::new(config.ooo_queue_capacity.max(1)));
    let copy_executor: Arc<dyn CopyExecutor<usize>> = Arc::new(TracingCopyExecutor);

    let facade = Arc::new(DemoCatalogFacade::new(
        Arc::clone(&file_io),
        Arc::clone(&copy_queue),
        Arc::clone(&copy_executor),
    ));
    let (scheduler, consumers) = Scheduler::new(Arc::clone(&facade), config.clone());
    let scheduler = Arc::new(scheduler);
    let clock: Arc<dyn WallClock> = Arc::new(RealClock::new());
    let symbol_lookup: Arc<dyn SymbolTableLookup> = Arc::new(NullSymbolTableLookup);

    // One inbox channel per I/O worker. A real deployment hands the
    // sender half to whatever accepts connections; this binary has no
    // listener of its own, so the senders are just kept alive for the
    // life of the process.
    let mut io_jobs = Vec::with_capacity(config.n_io_workers.max(1));
    let mut io_inboxes: Vec<Sender<Vec<u8>>> = Vec::with_capacity(config.n_io_workers.max(1));
    for _ in 0..config.n_io_workers.max(1) {
        let (tx, rx) = channel();
        io_inboxes.push(tx);
        io_jobs.push(NetworkIoJob::new(
            Arc::clone(&scheduler),
            Box::new(IlpLineParser::new()),
            Arc::clone(&symbol_lookup),
            Arc::clone(&clock),
            config.clone(),
            rx,
        ));
    }
    let io_pool = WorkerPool::spawn("ingest-io", io_jobs, Duration::from_millis(10));

    // One writer thread per consumer handle the scheduler's dispatch
    // queue was built with, sharing the same catalog the scheduler
    // routes rows through so ownership decisions stay consistent.
    let catalog = scheduler.catalog_handle();
    let writer_jobs: Vec<_> = consumers
        .into_iter()
        .enumerate()
        .map(|(worker_id, consumer)| {
            WriterJob::new(
                worker_id,
                Arc::clone(&facade),
                Arc::clone(&catalog),
                consumer,
                config.clone(),
                Arc::clone(&clock),
            )
        })
        .collect();
    let writer_pool = WorkerPool::spawn("ingest-writer", writer_jobs, Duration::from_millis(10));

    let copy_workers: Vec<_> = (0..config.n_ooo_workers.max(1))
        .map(|_| CopyWorker {
            queue: Arc::clone(&copy_queue),
            executor: Arc::clone(&copy_executor),
        })
        .collect();
    let copy_pool = WorkerPool::spawn("ingest-copy", copy_workers, Duration::from_millis(10));

    tracing::info!(
        n_io_workers = io_pool.len(),
        n_writer_threads = writer_pool.len(),
        n_ooo_workers = copy_pool.len(),
        "worker pools running"
    );

    // No listener is wired up in this binary; park the main thread so
    // the pools stay alive until the process is signaled to stop.
    loop {
        std::thread::park();
    }
}
