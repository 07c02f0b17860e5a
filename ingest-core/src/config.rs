//! Tunables for the ingestion scheduler.
//!
//! Every field here corresponds to a named configuration key in the design;
//! all carry defaults so a partial configuration file deserializes cleanly.

use serde::Deserialize;

/// How a table's rows are grouped into on-disk partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartitionBy {
    /// No partitioning; all rows live in a single directory.
    None,
    /// One partition per UTC day.
    Day,
    /// One partition per UTC month.
    Month,
    /// One partition per UTC year.
    Year,
}

impl Default for PartitionBy {
    fn default() -> Self {
        PartitionBy::Day
    }
}

/// Scheduler, writer, and merge-planner tunables.
///
/// Deserializable from TOML (see `ingestd`'s config loader), with defaults
/// matching a single-node development setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of network I/O worker threads.
    pub n_io_workers: usize,
    /// Number of writer threads. Table affinity is load-balanced across
    /// exactly this many threads.
    pub n_writer_threads: usize,
    /// Number of worker threads draining the out-of-order copy-task queue.
    pub n_ooo_workers: usize,

    /// Capacity (slot count) of the I/O-to-writer dispatch ring. Must be a
    /// power of two.
    pub writer_queue_capacity: usize,
    /// Capacity of the out-of-order copy-task queue.
    pub ooo_queue_capacity: usize,

    /// Largest single measurement line accepted by the parser, in bytes.
    pub max_measurement_size: usize,

    /// Approximate number of rows between load-rebalance attempts, counted
    /// per writer thread using the intentionally unsynchronized `n_updates`
    /// counter.
    pub n_updates_per_load_rebalance: u64,
    /// Minimum ratio between the busiest and least-busy writer thread's load
    /// before a rebalance is considered.
    pub max_load_ratio: f64,

    /// Number of uncommitted rows a writer will buffer before forcing a
    /// commit.
    pub max_uncommitted_rows: usize,
    /// Interval between maintenance passes on both I/O and writer jobs, in
    /// milliseconds.
    pub maintenance_hysteresis_ms: i64,
    /// How long a table may go unobserved by an I/O worker before its writer
    /// is released back to the idle pool, in milliseconds.
    pub min_idle_ms_before_writer_release: i64,
    /// Minimum delay between commits triggered by the uncommitted-row
    /// threshold, in microseconds.
    pub commit_hysteresis_micros: i64,

    /// Default partitioning scheme for newly created tables.
    pub default_partition_by: PartitionBy,
    /// Whether newly created tables cache symbol values by default.
    pub default_symbol_cache_flag: bool,
    /// Default initial capacity of a newly created table's symbol columns.
    pub default_symbol_capacity: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            n_io_workers: 2,
            n_writer_threads: 2,
            n_ooo_workers: 2,
            writer_queue_capacity: 1024,
            ooo_queue_capacity: 256,
            max_measurement_size: 32 * 1024,
            n_updates_per_load_rebalance: 10_000,
            max_load_ratio: 1.5,
            max_uncommitted_rows: 1_000,
            maintenance_hysteresis_ms: 1_000,
            min_idle_ms_before_writer_release: 30_000,
            commit_hysteresis_micros: 0,
            default_partition_by: PartitionBy::Day,
            default_symbol_cache_flag: true,
            default_symbol_capacity: 256,
        }
    }
}

impl IngestConfig {
    /// Parses a configuration from a TOML document, falling back to
    /// [`IngestConfig::default`] for any field the document omits.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
