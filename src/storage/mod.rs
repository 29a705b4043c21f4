//! Storage Module
//!
//! Persistent storage layer for one tablet.
//!
//! ## Responsibilities
//! - Persist flushed rows as immutable sorted base files
//! - Persist flushed row changes as immutable delta units
//! - Efficient ordered iteration and point lookups
//! - Atomic manifest swaps for flush and compaction
//! - Deferred, reference-counted retirement of replaced files
//!
//! ## Layout
//! ```text
//! tables/<name>/data/
//! ├── MANIFEST            live file set + flush watermarks
//! ├── base_000001.tbs     rows as of some sequence number
//! └── delta_000002.tdl    ordered (seq, change) lists per row
//! ```

mod base;
mod delta;
mod file;
mod manager;
mod manifest;

pub use base::{base_path, BaseFile, BaseFileWriter, BaseRecord};
pub use delta::{delta_path, DeltaUnit, DeltaUnitMeta};
pub use file::{FileMeta, SortedFileBuilder, SortedFileIterator, SortedFileReader, BASE_MAGIC, DELTA_MAGIC};
pub use manager::{LoadedFiles, Retired, StorageManager};
pub use manifest::Manifest;
