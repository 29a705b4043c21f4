//! Periodic greedy maintenance loop

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::sync::ShutdownSignal;
use crate::tablet::Tablet;

use super::op::{MaintenanceOp, MaintenanceOpStats};
use super::ops::tablet_ops;

/// Result of one op picked by a tick
#[derive(Debug)]
pub struct OpOutcome {
    pub name: String,
    pub score: f64,
    pub result: Result<()>,
}

/// An op that keeps failing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailingOp {
    pub name: String,
    pub consecutive_failures: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceHealth {
    Healthy,
    /// Ops that reached the failure threshold
    Degraded(Vec<FailingOp>),
}

impl MaintenanceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, MaintenanceHealth::Healthy)
    }
}

struct Inner {
    config: Config,
    ops: RwLock<Vec<Arc<dyn MaintenanceOp>>>,
    tablets: RwLock<Vec<Arc<Tablet>>>,
    failures: Mutex<HashMap<String, FailingOp>>,
    shutdown: ShutdownSignal,
    ticks: AtomicU64,
}

/// Scores registered ops each tick and runs the best one
///
/// ```text
///   tick ──► update_stats(all ops) ──► filter runnable, budget, benefit
///                                          │
///                                          ▼
///                                   perform(best op) ──► record outcome
///                                          │
///                                          ▼
///                                   purge retired files/stores
/// ```
pub struct MaintenanceManager {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceManager {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ops: RwLock::new(Vec::new()),
                tablets: RwLock::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                shutdown: ShutdownSignal::new(),
                ticks: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Register a tablet and all of its ops
    pub fn register_tablet(&self, tablet: &Arc<Tablet>) {
        for op in tablet_ops(tablet) {
            self.register_op(op);
        }
        self.inner.tablets.write().push(Arc::clone(tablet));
        debug!(tablet = %tablet.name(), "tablet registered for maintenance");
    }

    pub fn register_op(&self, op: Arc<dyn MaintenanceOp>) {
        self.inner.ops.write().push(op);
    }

    pub fn op_names(&self) -> Vec<String> {
        self.inner.ops.read().iter().map(|op| op.name().to_string()).collect()
    }

    /// Run a single scheduling tick on the calling thread
    pub fn run_once(&self) -> Option<OpOutcome> {
        self.inner.run_once()
    }

    /// Start the background loop. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.inner.shutdown.is_shutdown() {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("maintenance".to_string())
            .spawn(move || {
                let interval = inner.config.maintenance_interval();
                info!(interval_ms = interval.as_millis() as u64, "maintenance loop started");
                while !inner.shutdown.wait_timeout(interval) {
                    inner.run_once();
                }
                info!("maintenance loop stopped");
            })?;
        *handle = Some(spawned);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> MaintenanceHealth {
        let threshold = self.inner.config.flush_failure_threshold.max(1);
        let mut failing: Vec<FailingOp> = self
            .inner
            .failures
            .lock()
            .values()
            .filter(|f| f.consecutive_failures >= threshold)
            .cloned()
            .collect();
        if failing.is_empty() {
            return MaintenanceHealth::Healthy;
        }
        failing.sort_by(|a, b| a.name.cmp(&b.name));
        MaintenanceHealth::Degraded(failing)
    }

    /// Stop the loop and wait for it. An op already running finishes first.
    pub fn shutdown(&self) {
        self.inner.shutdown.shutdown();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn run_once(&self) -> Option<OpOutcome> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let outcome = self.pick().map(|(op, score)| {
            debug!(op = op.name(), score, "running maintenance op");
            let result = op.perform();
            self.record(op.name(), &result);
            OpOutcome {
                name: op.name().to_string(),
                score,
                result,
            }
        });

        let purged: usize = self.tablets.read().iter().map(|t| t.purge_retired()).sum();
        if purged > 0 {
            debug!(purged, "released retired files");
        }
        outcome
    }

    fn pick(&self) -> Option<(Arc<dyn MaintenanceOp>, f64)> {
        let mut best: Option<(Arc<dyn MaintenanceOp>, f64)> = None;
        for op in self.ops.read().iter() {
            let mut stats = MaintenanceOpStats::default();
            op.update_stats(&mut stats);
            if !stats.runnable || stats.io_cost_bytes > self.config.maintenance_io_budget_bytes {
                continue;
            }
            let score = stats.score(self.config.memstore_size_limit);
            if score < self.config.min_maintenance_benefit {
                continue;
            }
            if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((Arc::clone(op), score));
            }
        }
        best
    }

    fn record(&self, name: &str, result: &Result<()>) {
        let mut failures = self.failures.lock();
        match result {
            Ok(()) => {
                if failures.remove(name).is_some() {
                    info!(op = name, "maintenance op recovered");
                }
            }
            Err(e) => {
                let entry = failures.entry(name.to_string()).or_insert_with(|| FailingOp {
                    name: name.to_string(),
                    consecutive_failures: 0,
                    last_error: String::new(),
                });
                entry.consecutive_failures += 1;
                entry.last_error = e.to_string();
                warn!(
                    op = name,
                    failures = entry.consecutive_failures,
                    error = %e,
                    "maintenance op failed"
                );
            }
        }
    }
}
