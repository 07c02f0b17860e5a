//! Multi-threaded ingestion scheduler for a columnar time-series store.
//!
//! The crate is organized around the three coupled subsystems described by
//! the design: a ring-queue dispatcher that routes parsed rows from network
//! I/O threads to writer threads with per-table affinity ([`queue`],
//! [`scheduler`]), a load rebalancer that migrates hot tables between writer
//! threads without losing ordering ([`scheduler::Scheduler::load_rebalance`]),
//! and an out-of-order partition merge planner that decides how to fold
//! incoming rows into on-disk partitions ([`ooo`]).
//!
//! Everything this crate talks to outside of itself — the catalog, the
//! per-table writer, the file-I/O façade, the line-protocol parser, and the
//! symbol-table lookup — is expressed as a trait in [`facade`], so the
//! scheduler, worker jobs, and planner can run against in-memory fakes in
//! tests without a real network stack or filesystem.

pub mod catalog;
pub mod config;
pub mod event;
pub mod facade;
pub mod ilp;
pub mod io_job;
pub mod ooo;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod symbol;
pub mod workqueue;
pub mod writer_job;

pub use config::IngestConfig;
pub use event::{ColumnRef, Entity, EntityValue, MeasurementEvent, RowPayload};
pub use facade::{CatalogFacade, FileIo, LineParser, SymbolTableLookup, TableStatus, TableWriter};
pub use ilp::IlpLineParser;
pub use scheduler::Scheduler;

#[cfg(test)]
pub mod test_support;
