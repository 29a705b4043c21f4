//! # tabletdb
//!
//! A tabular data store with:
//! - Client write sessions that batch mutations with at most one
//!   outstanding flush
//! - A one-shot background client bootstrap
//! - A per-table tablet engine: WAL, MemStore, delta stores, base files
//! - Background flush and delta compaction driven by a greedy scheduler
//! - Snapshot-isolated scanners
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Client: WriteSession / Scanner / Bootstrap            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Transport (TCP frames or in-process)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    TabletServer                              │
//! │        (table catalog, scanner registry, maintenance)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ one Tablet per table
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────────────┐
//!   │     WAL     │          │ MemStore / DeltaMem  │
//!   │  (Append)   │          │      (RwLock)        │
//!   └─────────────┘          └──────────┬───────────┘
//!                                       │ flush
//!                                       ▼
//!                           ┌──────────────────────┐
//!                           │ Base files + deltas  │
//!                           │  (compacted in bg)   │
//!                           └──────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod util;

pub mod mutation;
pub mod schema;
pub mod sync;

pub mod memstore;
pub mod storage;
pub mod tablet;
pub mod wal;

pub mod maintenance;
pub mod status;

pub mod client;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{
    AsyncClientInitializer, BuildClient, Client, ClientBuilder, FlushMode, Scanner, Table,
    WriteSession,
};
pub use config::{Config, WalSyncStrategy};
pub use error::{Result, TabletError};
pub use maintenance::{MaintenanceHealth, MaintenanceManager};
pub use mutation::{Mutation, MutationKind};
pub use schema::{DataType, PartialRow, Row, Schema, Value};
pub use sync::{SharedFuture, Synchronizer};
pub use tablet::{Tablet, TabletServer};
pub use util::backoff::BackoffPolicy;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tabletdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
