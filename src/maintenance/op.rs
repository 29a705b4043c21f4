//! Maintenance op contract and scoring

use crate::error::Result;

/// What an op would cost and gain if run now
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceOpStats {
    /// Whether the op has anything to do
    pub runnable: bool,
    /// Memory released by running the op (bytes)
    pub ram_anchored: u64,
    /// Estimated bytes read and written
    pub io_cost_bytes: u64,
    /// Expected reduction in future read cost, unitless
    pub perf_improvement: f64,
}

impl MaintenanceOpStats {
    /// Greedy score: memory pressure relieved plus read-cost improvement
    pub fn score(&self, memstore_size_limit: usize) -> f64 {
        let pressure = self.ram_anchored as f64 / memstore_size_limit.max(1) as f64;
        pressure + self.perf_improvement
    }
}

/// A unit of background work the scheduler can pick
pub trait MaintenanceOp: Send + Sync {
    /// Unique name, used in logs and health reports
    fn name(&self) -> &str;

    /// Refresh `stats` from current tablet state
    fn update_stats(&self, stats: &mut MaintenanceOpStats);

    /// Run the op to completion
    fn perform(&self) -> Result<()>;
}
