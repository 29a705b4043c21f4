//! Tablet Module
//!
//! The storage engine for one table and the server that hosts tables.
//!
//! ## Write path
//!
//! ```text
//!   write_batch ──► validate ──► WAL append ──► route by key history
//!                                                 │
//!                        ┌────────────────────────┴──────────────┐
//!                        ▼                                       ▼
//!                 ┌─────────────┐  new key / key only     ┌───────────────┐
//!                 │  MemStore   │  in active MemStore     │ DeltaMemStore │
//!                 └──────┬──────┘                         └───────┬───────┘
//!                        │ flush                                  │ delta flush
//!                        ▼                                        ▼
//!                 ┌─────────────┐   major compaction      ┌───────────────┐
//!                 │ Base files  │ ◄────────────────────── │  Delta units  │
//!                 └─────────────┘                         └───────────────┘
//!                                                           ▲     │
//!                                                           └─────┘
//!                                                        minor compaction
//! ```
//!
//! ## Responsibilities
//! - Assign sequence numbers and publish the committed sequence per batch
//! - Swap immutable `TabletVersion`s on freeze, flush and compaction
//! - Fold row histories (per-column last writer wins) for lookups and scans
//! - Serve scanners pinned to the version they were opened on
//! - Host tables, the scanner registry and the maintenance loop (`TabletServer`)

mod compaction;
mod fold;
mod merge;
mod scanner;
mod server;
#[allow(clippy::module_inception)]
mod tablet;
mod version;

pub use compaction::CompactionSummary;
pub use fold::{apply_change, RowHistory};
pub use merge::{MergingIterator, RowSource, SourceEntry};
pub use scanner::TabletScanner;
pub use server::{ScanBatch, TabletServer};
pub use tablet::{Tablet, WriteOutcome};
pub use version::TabletVersion;
