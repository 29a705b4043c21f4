//! Per-tablet maintenance ops

use std::sync::Arc;

use crate::error::Result;
use crate::tablet::Tablet;

use super::op::{MaintenanceOp, MaintenanceOpStats};

/// Build every op a tablet needs
pub fn tablet_ops(tablet: &Arc<Tablet>) -> Vec<Arc<dyn MaintenanceOp>> {
    vec![
        Arc::new(FlushMemStoreOp::new(Arc::clone(tablet))),
        Arc::new(FlushDeltasOp::new(Arc::clone(tablet))),
        Arc::new(MinorDeltaCompactionOp::new(Arc::clone(tablet))),
        Arc::new(MajorDeltaCompactionOp::new(Arc::clone(tablet))),
        Arc::new(WalGcOp::new(Arc::clone(tablet))),
    ]
}

// =============================================================================
// Flush Ops
// =============================================================================

/// Writes the oldest frozen (or the active) MemStore to a base file
pub struct FlushMemStoreOp {
    name: String,
    tablet: Arc<Tablet>,
}

impl FlushMemStoreOp {
    pub fn new(tablet: Arc<Tablet>) -> Self {
        Self {
            name: format!("FlushMemStore({})", tablet.name()),
            tablet,
        }
    }
}

impl MaintenanceOp for FlushMemStoreOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_stats(&self, stats: &mut MaintenanceOpStats) {
        let version = self.tablet.current_version();
        let bytes = version.memstore_bytes() as u64;
        stats.runnable = bytes > 0;
        stats.ram_anchored = bytes;
        stats.io_cost_bytes = bytes;
        // A frozen MemStore already crossed its limit
        stats.perf_improvement = if version.frozen_memstores.is_empty() { 0.0 } else { 1.0 };
    }

    fn perform(&self) -> Result<()> {
        self.tablet.flush_memstore().map(|_| ())
    }
}

/// Writes the oldest frozen (or the active) DeltaMemStore as a delta unit
pub struct FlushDeltasOp {
    name: String,
    tablet: Arc<Tablet>,
}

impl FlushDeltasOp {
    pub fn new(tablet: Arc<Tablet>) -> Self {
        Self {
            name: format!("FlushDeltas({})", tablet.name()),
            tablet,
        }
    }
}

impl MaintenanceOp for FlushDeltasOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_stats(&self, stats: &mut MaintenanceOpStats) {
        let version = self.tablet.current_version();
        let bytes = version.delta_memstore_bytes() as u64;
        stats.runnable = bytes > 0;
        stats.ram_anchored = bytes;
        stats.io_cost_bytes = bytes;
        stats.perf_improvement = if version.frozen_deltas.is_empty() { 0.0 } else { 1.0 };
    }

    fn perform(&self) -> Result<()> {
        self.tablet.flush_deltas().map(|_| ())
    }
}

// =============================================================================
// Compaction Ops
// =============================================================================

/// Merges delta units once there are enough of them
pub struct MinorDeltaCompactionOp {
    name: String,
    tablet: Arc<Tablet>,
}

impl MinorDeltaCompactionOp {
    pub fn new(tablet: Arc<Tablet>) -> Self {
        Self {
            name: format!("MinorDeltaCompaction({})", tablet.name()),
            tablet,
        }
    }
}

impl MaintenanceOp for MinorDeltaCompactionOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_stats(&self, stats: &mut MaintenanceOpStats) {
        let version = self.tablet.current_version();
        let trigger = self.tablet.config().delta_units_compaction_trigger.max(2);
        let units = version.delta_units.len();

        stats.runnable = units >= trigger;
        stats.ram_anchored = 0;
        stats.io_cost_bytes = version.delta_units.iter().map(|u| u.file_size()).sum();
        // Each merged-away unit is one fewer file per scan
        stats.perf_improvement = if stats.runnable {
            (units - 1) as f64 / trigger as f64
        } else {
            0.0
        };
    }

    fn perform(&self) -> Result<()> {
        self.tablet.compact_deltas_minor().map(|_| ())
    }
}

/// Folds delta units into base files
pub struct MajorDeltaCompactionOp {
    name: String,
    tablet: Arc<Tablet>,
}

impl MajorDeltaCompactionOp {
    pub fn new(tablet: Arc<Tablet>) -> Self {
        Self {
            name: format!("MajorDeltaCompaction({})", tablet.name()),
            tablet,
        }
    }
}

impl MaintenanceOp for MajorDeltaCompactionOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_stats(&self, stats: &mut MaintenanceOpStats) {
        let version = self.tablet.current_version();
        stats.runnable = !version.delta_units.is_empty() && version.frozen_memstores.is_empty();
        stats.ram_anchored = 0;
        stats.io_cost_bytes = if stats.runnable {
            version.delta_units.iter().map(|u| u.file_size()).sum::<u64>()
                + version.touched_base_files().iter().map(|b| b.file_size()).sum::<u64>()
        } else {
            0
        };
        // Deltas applied per stored row on every scan
        stats.perf_improvement = if stats.runnable {
            version.delta_change_count() as f64 / version.base_row_count().max(1) as f64
        } else {
            0.0
        };
    }

    fn perform(&self) -> Result<()> {
        self.tablet.compact_deltas_major().map(|_| ())
    }
}

// =============================================================================
// WAL GC
// =============================================================================

/// Deletes WAL segments whose entries all live in files
pub struct WalGcOp {
    name: String,
    tablet: Arc<Tablet>,
}

impl WalGcOp {
    pub fn new(tablet: Arc<Tablet>) -> Self {
        Self {
            name: format!("WalGc({})", tablet.name()),
            tablet,
        }
    }
}

impl MaintenanceOp for WalGcOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_stats(&self, stats: &mut MaintenanceOpStats) {
        let (segments, _bytes) = self.tablet.wal_reclaimable();
        stats.runnable = segments > 0;
        stats.ram_anchored = 0;
        stats.io_cost_bytes = 0;
        stats.perf_improvement = (segments as f64 * 0.25).min(1.0);
    }

    fn perform(&self) -> Result<()> {
        self.tablet.gc_wal().map(|_| ())
    }
}
