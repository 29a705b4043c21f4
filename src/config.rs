//! Configuration for tabletdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::util::backoff::BackoffPolicy;

/// Main configuration for a tablet server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── tables/{name}/
    ///           ├── schema
    ///           ├── wal/wal_NNNNNN.log
    ///           └── data/
    ///                 ├── MANIFEST
    ///                 └── base_NNNNNN.tbs, delta_NNNNNN.tdl
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Roll to a new WAL segment once the current one reaches this size
    pub wal_segment_size: u64,

    // -------------------------------------------------------------------------
    // MemStore / Delta Configuration
    // -------------------------------------------------------------------------
    /// Max size of the active MemStore before it is frozen for flush (bytes)
    pub memstore_size_limit: usize,

    /// Max size of the active DeltaMemStore before it is frozen (bytes)
    pub delta_memstore_size_limit: usize,

    /// Number of delta units at which minor delta compaction becomes runnable
    pub delta_units_compaction_trigger: usize,

    // -------------------------------------------------------------------------
    // Maintenance Configuration
    // -------------------------------------------------------------------------
    /// Polling interval of the maintenance loop (milliseconds)
    pub maintenance_interval_ms: u64,

    /// Max estimated I/O a single maintenance op may cost (bytes)
    pub maintenance_io_budget_bytes: u64,

    /// Ops scoring below this are not run
    pub min_maintenance_benefit: f64,

    /// Retry policy for MemStore/delta flush I/O
    pub flush_backoff: BackoffPolicy,

    /// Consecutive op failures before the maintenance manager reports degraded
    pub flush_failure_threshold: u32,

    // -------------------------------------------------------------------------
    // Scan Configuration
    // -------------------------------------------------------------------------
    /// Default number of rows per scan batch
    pub scan_batch_rows: usize,

    /// Upper bound on time spent assembling one batch (milliseconds)
    pub scan_batch_max_latency_ms: u64,

    /// Idle scanners are expired after this long (milliseconds)
    pub scanner_ttl_ms: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write batch (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tabletdb_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            wal_segment_size: 8 * 1024 * 1024, // 8 MB
            memstore_size_limit: 8 * 1024 * 1024, // 8 MB
            delta_memstore_size_limit: 4 * 1024 * 1024, // 4 MB
            delta_units_compaction_trigger: 4,
            maintenance_interval_ms: 250,
            maintenance_io_budget_bytes: 1024 * 1024 * 1024, // 1 GB
            min_maintenance_benefit: 0.1,
            flush_backoff: BackoffPolicy::default(),
            flush_failure_threshold: 3,
            scan_batch_rows: 1000,
            scan_batch_max_latency_ms: 200,
            scanner_ttl_ms: 60_000,
            listen_addr: "127.0.0.1:7051".to_string(),
            max_connections: 1024,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Maintenance polling interval as a Duration
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Scanner TTL as a Duration
    pub fn scanner_ttl(&self) -> Duration {
        Duration::from_millis(self.scanner_ttl_ms)
    }

    /// Batch assembly bound as a Duration
    pub fn scan_batch_max_latency(&self) -> Duration {
        Duration::from_millis(self.scan_batch_max_latency_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL segment size (in bytes)
    pub fn wal_segment_size(mut self, size: u64) -> Self {
        self.config.wal_segment_size = size;
        self
    }

    /// Set the MemStore size limit (in bytes)
    pub fn memstore_size_limit(mut self, size: usize) -> Self {
        self.config.memstore_size_limit = size;
        self
    }

    /// Set the DeltaMemStore size limit (in bytes)
    pub fn delta_memstore_size_limit(mut self, size: usize) -> Self {
        self.config.delta_memstore_size_limit = size;
        self
    }

    /// Set the delta unit count that triggers minor compaction
    pub fn delta_units_compaction_trigger(mut self, count: usize) -> Self {
        self.config.delta_units_compaction_trigger = count;
        self
    }

    /// Set the maintenance polling interval (in milliseconds)
    pub fn maintenance_interval_ms(mut self, ms: u64) -> Self {
        self.config.maintenance_interval_ms = ms;
        self
    }

    /// Set the per-op maintenance I/O budget (in bytes)
    pub fn maintenance_io_budget_bytes(mut self, bytes: u64) -> Self {
        self.config.maintenance_io_budget_bytes = bytes;
        self
    }

    /// Set the minimum score an op needs to be run
    pub fn min_maintenance_benefit(mut self, score: f64) -> Self {
        self.config.min_maintenance_benefit = score;
        self
    }

    /// Set the flush retry policy
    pub fn flush_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.flush_backoff = policy;
        self
    }

    /// Set how many consecutive failures mark maintenance degraded
    pub fn flush_failure_threshold(mut self, count: u32) -> Self {
        self.config.flush_failure_threshold = count;
        self
    }

    /// Set the default scan batch size (in rows)
    pub fn scan_batch_rows(mut self, rows: usize) -> Self {
        self.config.scan_batch_rows = rows;
        self
    }

    /// Set the scan batch latency bound (in milliseconds)
    pub fn scan_batch_max_latency_ms(mut self, ms: u64) -> Self {
        self.config.scan_batch_max_latency_ms = ms;
        self
    }

    /// Set the scanner TTL (in milliseconds)
    pub fn scanner_ttl_ms(mut self, ms: u64) -> Self {
        self.config.scanner_ttl_ms = ms;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
