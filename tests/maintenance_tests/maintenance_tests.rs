//! Tests for the maintenance scheduler
//!
//! These tests verify:
//! - The highest scoring runnable op is picked each tick
//! - Ops under the minimum benefit or over the I/O budget are skipped
//! - Repeated failures degrade health, and a success clears it
//! - The background loop ticks, flushes frozen MemStores and stops cleanly

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tabletdb::maintenance::{MajorDeltaCompactionOp, MaintenanceOp, MaintenanceOpStats};
use tabletdb::mutation::RowOperation;
use tabletdb::schema::{RowKey, Value};
use tabletdb::{Config, DataType, MaintenanceHealth, MaintenanceManager, Schema, Tablet, TabletError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_tablet(temp: &TempDir, config: Config) -> Arc<Tablet> {
    let schema = Schema::builder()
        .key_column("key", DataType::Int64)
        .column("v", DataType::Int64, true)
        .build()
        .unwrap();
    Arc::new(Tablet::open(&temp.path().join("t"), "t", Arc::new(schema), config).unwrap())
}

fn insert_rows(tablet: &Tablet, keys: std::ops::Range<i64>) {
    let ops: Vec<RowOperation> = keys
        .map(|k| RowOperation::insert(RowKey::from(k), vec![(1, Value::Int64(k))]))
        .collect();
    tablet.write_batch(&ops).unwrap();
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Op with fixed stats that fails while `failing` is set
struct FakeOp {
    name: String,
    stats: MaintenanceOpStats,
    failing: AtomicBool,
    runs: AtomicUsize,
}

impl FakeOp {
    fn new(name: &str, perf_improvement: f64, io_cost_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            stats: MaintenanceOpStats {
                runnable: true,
                ram_anchored: 0,
                io_cost_bytes,
                perf_improvement,
            },
            failing: AtomicBool::new(false),
            runs: AtomicUsize::new(0),
        })
    }
}

impl MaintenanceOp for FakeOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_stats(&self, stats: &mut MaintenanceOpStats) {
        *stats = self.stats.clone();
    }

    fn perform(&self) -> tabletdb::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TabletError::Flush("disk full".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Scheduling Tests
// =============================================================================

#[test]
fn test_register_tablet_adds_one_op_per_kind() {
    let temp = TempDir::new().unwrap();
    let tablet = open_tablet(&temp, Config::builder().data_dir(temp.path()).build());
    let manager = MaintenanceManager::new(Config::default());
    manager.register_tablet(&tablet);

    assert_eq!(
        manager.op_names(),
        vec![
            "FlushMemStore(t)",
            "FlushDeltas(t)",
            "MinorDeltaCompaction(t)",
            "MajorDeltaCompaction(t)",
            "WalGc(t)",
        ]
    );
}

#[test]
fn test_idle_tablet_runs_nothing() {
    let temp = TempDir::new().unwrap();
    let tablet = open_tablet(&temp, Config::builder().data_dir(temp.path()).build());
    let manager = MaintenanceManager::new(Config::default());
    manager.register_tablet(&tablet);

    assert!(manager.run_once().is_none());
    assert_eq!(manager.ticks(), 1);
}

#[test]
fn test_small_active_memstore_below_min_benefit() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp.path()).build();
    let tablet = open_tablet(&temp, config.clone());
    let manager = MaintenanceManager::new(config);
    manager.register_tablet(&tablet);

    insert_rows(&tablet, 0..5);
    assert!(manager.run_once().is_none());
    assert!(tablet.current_version().base_files.is_empty());
}

#[test]
fn test_frozen_memstore_is_flushed_first() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp.path()).build();
    let tablet = open_tablet(&temp, config.clone());
    let manager = MaintenanceManager::new(config);
    manager.register_tablet(&tablet);

    insert_rows(&tablet, 0..50);
    assert!(tablet.freeze_memstore());

    let outcome = manager.run_once().unwrap();
    assert_eq!(outcome.name, "FlushMemStore(t)");
    assert!(outcome.score >= 1.0);
    assert!(outcome.result.is_ok());

    let version = tablet.current_version();
    assert!(version.frozen_memstores.is_empty());
    assert_eq!(version.base_files.len(), 1);
    // The flushed MemStore was released at the end of the tick
    assert_eq!(tablet.storage().retired_count(), 0);
}

#[test]
fn test_wal_gc_runs_after_flush() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp.path()).build();
    let tablet = open_tablet(&temp, config.clone());
    let manager = MaintenanceManager::new(config);
    manager.register_tablet(&tablet);

    insert_rows(&tablet, 0..10);
    tablet.flush_memstore().unwrap();
    assert_eq!(tablet.wal_reclaimable().0, 1);

    let outcome = manager.run_once().unwrap();
    assert_eq!(outcome.name, "WalGc(t)");
    assert_eq!(tablet.wal_reclaimable().0, 0);
}

#[test]
fn test_highest_score_wins() {
    let manager = MaintenanceManager::new(Config::default());
    let low = FakeOp::new("low", 0.5, 0);
    let high = FakeOp::new("high", 2.0, 0);
    manager.register_op(low.clone());
    manager.register_op(high.clone());

    let outcome = manager.run_once().unwrap();
    assert_eq!(outcome.name, "high");
    assert_eq!(high.runs.load(Ordering::SeqCst), 1);
    assert_eq!(low.runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_op_over_io_budget_is_skipped() {
    let config = Config::builder().maintenance_io_budget_bytes(1024).build();
    let manager = MaintenanceManager::new(config);
    let big = FakeOp::new("big", 5.0, 4096);
    let small = FakeOp::new("small", 0.5, 512);
    manager.register_op(big.clone());
    manager.register_op(small);

    assert_eq!(manager.run_once().unwrap().name, "small");
    assert_eq!(big.runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_major_compaction_cost_counts_only_touched_bases() {
    let temp = TempDir::new().unwrap();
    let tablet = open_tablet(&temp, Config::builder().data_dir(temp.path()).build());
    insert_rows(&tablet, 0..50);
    tablet.flush_memstore().unwrap();
    insert_rows(&tablet, 50..100);
    tablet.flush_memstore().unwrap();

    let update = RowOperation::update(RowKey::from(3), vec![(1, Value::Int64(-3))]);
    tablet.write_batch(&[update]).unwrap();
    tablet.flush_deltas().unwrap();

    let version = tablet.current_version();
    assert_eq!(version.base_files.len(), 2);
    let touched = version.touched_base_files();
    assert_eq!(touched.len(), 1);
    assert!(touched[0].contains_key(&RowKey::from(3)));

    let mut stats = MaintenanceOpStats::default();
    MajorDeltaCompactionOp::new(Arc::clone(&tablet)).update_stats(&mut stats);
    assert!(stats.runnable);
    assert_eq!(
        stats.io_cost_bytes,
        version.delta_units[0].file_size() + touched[0].file_size()
    );
}

// =============================================================================
// Health Tests
// =============================================================================

#[test]
fn test_repeated_failures_degrade_health() {
    let config = Config::builder().flush_failure_threshold(3).build();
    let manager = MaintenanceManager::new(config);
    let op = FakeOp::new("flaky", 1.0, 0);
    op.failing.store(true, Ordering::SeqCst);
    manager.register_op(op.clone());

    for _ in 0..2 {
        let outcome = manager.run_once().unwrap();
        assert!(matches!(outcome.result, Err(TabletError::Flush(_))));
    }
    assert!(manager.health().is_healthy());

    manager.run_once().unwrap();
    match manager.health() {
        MaintenanceHealth::Degraded(failing) => {
            assert_eq!(failing.len(), 1);
            assert_eq!(failing[0].name, "flaky");
            assert_eq!(failing[0].consecutive_failures, 3);
            assert!(failing[0].last_error.contains("disk full"));
        }
        MaintenanceHealth::Healthy => panic!("expected degraded health"),
    }

    op.failing.store(false, Ordering::SeqCst);
    assert!(manager.run_once().unwrap().result.is_ok());
    assert_eq!(manager.health(), MaintenanceHealth::Healthy);
}

// =============================================================================
// Background Loop Tests
// =============================================================================

#[test]
fn test_background_loop_ticks_and_stops() {
    let config = Config::builder().maintenance_interval_ms(5).build();
    let manager = MaintenanceManager::new(config);
    let op = FakeOp::new("tick", 1.0, 0);
    manager.register_op(op.clone());

    manager.start().unwrap();
    assert!(manager.is_running());
    assert!(wait_until(Duration::from_secs(5), || op.runs.load(Ordering::SeqCst) >= 3));

    manager.shutdown();
    assert!(!manager.is_running());
    let runs = op.runs.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(op.runs.load(Ordering::SeqCst), runs);

    // No restart after shutdown
    manager.start().unwrap();
    assert!(!manager.is_running());
}

#[test]
fn test_background_loop_flushes_frozen_memstore() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .maintenance_interval_ms(5)
        .build();
    let tablet = open_tablet(&temp, config.clone());
    let manager = MaintenanceManager::new(config);
    manager.register_tablet(&tablet);
    manager.start().unwrap();

    insert_rows(&tablet, 0..20);
    tablet.freeze_memstore();
    assert!(wait_until(Duration::from_secs(5), || {
        let version = tablet.current_version();
        version.frozen_memstores.is_empty() && version.base_files.len() == 1
    }));
    manager.shutdown();

    assert_eq!(
        tablet.get(&RowKey::from(7)).unwrap().unwrap().get_int64("v"),
        Some(7)
    );
}
