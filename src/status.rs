//! Process-wide status counters
//!
//! Each tablet owns a `TabletCounters` handle. While the registry is
//! initialized (`init()` at server startup, `shutdown()` at exit) handles
//! are also published under the tablet's id so an outside reader can take
//! a `snapshot()`. Counters are only changed through the increment/guard
//! methods below.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};

static REGISTRY: RwLock<Option<BTreeMap<String, Arc<TabletCounters>>>> = const_rwlock(None);

/// Start publishing counters
pub fn init() {
    let mut registry = REGISTRY.write();
    if registry.is_none() {
        *registry = Some(BTreeMap::new());
    }
}

/// Stop publishing counters and drop every registration
pub fn shutdown() {
    *REGISTRY.write() = None;
}

pub fn is_initialized() -> bool {
    REGISTRY.read().is_some()
}

/// Counters for `tablet_id`. Published if the registry is initialized;
/// an existing registration for the same id is reused.
pub fn tablet_counters(tablet_id: &str, table: &str) -> Arc<TabletCounters> {
    let mut registry = REGISTRY.write();
    match registry.as_mut() {
        Some(map) => Arc::clone(
            map.entry(tablet_id.to_string())
                .or_insert_with(|| Arc::new(TabletCounters::new(table))),
        ),
        None => Arc::new(TabletCounters::new(table)),
    }
}

/// Remove a tablet's registration
pub fn unregister(tablet_id: &str) {
    if let Some(map) = REGISTRY.write().as_mut() {
        map.remove(tablet_id);
    }
}

/// Read-only view of every published tablet
pub fn snapshot() -> Vec<TabletStatus> {
    REGISTRY
        .read()
        .as_ref()
        .map(|map| map.values().map(|c| c.status()).collect())
        .unwrap_or_default()
}

/// Live counters of one tablet
#[derive(Debug)]
pub struct TabletCounters {
    table: String,
    pending_scans: AtomicU64,
    pending_transactions: AtomicU64,
    rows_written: AtomicU64,
    memstore_flushes: AtomicU64,
    delta_flushes: AtomicU64,
    minor_compactions: AtomicU64,
    major_compactions: AtomicU64,
}

/// Point-in-time copy of a tablet's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletStatus {
    pub table: String,
    pub pending_scans: u64,
    pub pending_transactions: u64,
    pub rows_written: u64,
    pub memstore_flushes: u64,
    pub delta_flushes: u64,
    pub minor_compactions: u64,
    pub major_compactions: u64,
}

impl TabletCounters {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            pending_scans: AtomicU64::new(0),
            pending_transactions: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            memstore_flushes: AtomicU64::new(0),
            delta_flushes: AtomicU64::new(0),
            minor_compactions: AtomicU64::new(0),
            major_compactions: AtomicU64::new(0),
        }
    }

    /// Count an open scanner until the guard drops
    pub fn scan_started(self: &Arc<Self>) -> PendingGuard {
        PendingGuard::new(Arc::clone(self), Pending::Scan)
    }

    /// Count an in-flight write batch until the guard drops
    pub fn transaction_started(self: &Arc<Self>) -> PendingGuard {
        PendingGuard::new(Arc::clone(self), Pending::Transaction)
    }

    pub fn add_rows_written(&self, n: u64) {
        self.rows_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn memstore_flushed(&self) {
        self.memstore_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delta_flushed(&self) {
        self.delta_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn minor_compacted(&self) {
        self.minor_compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn major_compacted(&self) {
        self.major_compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pending_scans(&self) -> u64 {
        self.pending_scans.load(Ordering::Acquire)
    }

    pub fn pending_transactions(&self) -> u64 {
        self.pending_transactions.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TabletStatus {
        TabletStatus {
            table: self.table.clone(),
            pending_scans: self.pending_scans(),
            pending_transactions: self.pending_transactions(),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            memstore_flushes: self.memstore_flushes.load(Ordering::Relaxed),
            delta_flushes: self.delta_flushes.load(Ordering::Relaxed),
            minor_compactions: self.minor_compactions.load(Ordering::Relaxed),
            major_compactions: self.major_compactions.load(Ordering::Relaxed),
        }
    }

    fn gauge(&self, kind: Pending) -> &AtomicU64 {
        match kind {
            Pending::Scan => &self.pending_scans,
            Pending::Transaction => &self.pending_transactions,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    Scan,
    Transaction,
}

/// Decrements its gauge on drop
#[derive(Debug)]
pub struct PendingGuard {
    counters: Arc<TabletCounters>,
    kind: Pending,
}

impl PendingGuard {
    fn new(counters: Arc<TabletCounters>, kind: Pending) -> Self {
        counters.gauge(kind).fetch_add(1, Ordering::AcqRel);
        Self { counters, kind }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counters.gauge(self.kind).fetch_sub(1, Ordering::AcqRel);
    }
}
