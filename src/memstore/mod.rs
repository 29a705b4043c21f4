//! MemStore Module
//!
//! In-memory data structures for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered iteration for base/delta file creation
//! - MemStore lifecycle: Active → Flushing → Retired
//!
//! ## Data Structure Choice
//! Using BTreeMap wrapped in RwLock:
//! - Ordered keys (required for sorted file generation and merged scans)
//! - Each key keeps its full `(seq, change)` history so snapshot reads can
//!   ignore changes newer than their sequence number

mod map;
mod store;

pub use map::{ChangeList, ChangeMap};
pub use store::{DeltaMemStore, MemStore, MemStoreState};
