//! Tablet
//!
//! The storage engine for one table: coordinates the WAL, MemStores,
//! delta stores and files, and exposes the write path, point lookups,
//! scanners, and the flush operations driven by maintenance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::memstore::{DeltaMemStore, MemStore};
use crate::mutation::{MutationKind, RowChange, RowOperation};
use crate::schema::{Row, RowKey, Schema};
use crate::status::{self, TabletCounters};
use crate::storage::{
    base_path, delta_path, BaseFile, BaseFileWriter, BaseRecord, DeltaUnit, Manifest, Retired,
    StorageManager,
};
use crate::wal::{WalEntry, WalRecovery, WalTarget, WalWriter};
use crate::TabletError;

use super::fold::RowHistory;
use super::scanner::TabletScanner;
use super::version::TabletVersion;

/// Result of applying a write batch
#[derive(Debug, Default)]
pub struct WriteOutcome {
    /// Rows applied successfully
    pub applied: usize,
    /// Failed rows, by position in the batch
    pub row_errors: Vec<(usize, TabletError)>,
}

/// A single table's storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (write batches, MemStore/delta freezes): serialized by
///   `write_lock`. Each row gets the next sequence number, is logged, then
///   applied; `committed_seq` is published when the batch ends.
///
/// - **Reads** (lookups, scanners): take the current `TabletVersion` and
///   `committed_seq` together under the version read lock, then read
///   without further coordination.
///
/// - **Maintenance** (flush, delta flush, compactions): serialized by
///   `maintenance_lock`. Files are written outside every other lock; only
///   the final manifest write and version swap are brief critical sections.
pub struct Tablet {
    pub(super) name: String,
    pub(super) tablet_id: String,
    pub(super) schema: Arc<Schema>,
    pub(super) config: Config,
    pub(super) data_dir: PathBuf,

    pub(super) storage: StorageManager,
    pub(super) wal: Mutex<WalWriter>,

    /// Current version; replaced, never mutated
    pub(super) version: RwLock<Arc<TabletVersion>>,
    /// Highest sequence number visible to new readers
    pub(super) committed_seq: AtomicU64,

    pub(super) write_lock: Mutex<()>,
    pub(super) maintenance_lock: Mutex<()>,

    /// Last manifest written
    pub(super) manifest: Mutex<Manifest>,

    next_store_id: AtomicU64,
    pub(super) counters: Arc<TabletCounters>,
}

impl Tablet {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_DIR: &'static str = "wal";
    const DATA_DIR: &'static str = "data";

    /// Open or create a tablet rooted at `dir`
    ///
    /// On startup:
    /// 1. Open storage (manifest + listed files)
    /// 2. Recover the WAL, truncating a torn tail
    /// 3. Replay entries above the flush watermarks
    /// 4. Flush replayed MemStore rows so every recovered row has one home
    pub fn open(dir: &Path, name: &str, schema: Arc<Schema>, config: Config) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let data_dir = dir.join(Self::DATA_DIR);
        let wal_dir = dir.join(Self::WAL_DIR);

        let (storage, loaded) = StorageManager::open(&data_dir)?;
        let manifest = loaded.manifest;

        let (entries, recovery) = WalRecovery::recover(&wal_dir)?;
        if recovery.entries_recovered > 0 || recovery.was_truncated {
            info!(
                tablet = name,
                recovered = recovery.entries_recovered,
                truncated = recovery.was_truncated,
                last_lsn = recovery.last_lsn,
                "WAL recovery"
            );
        }

        let memstore = Arc::new(MemStore::new(1));
        let delta_memstore = Arc::new(DeltaMemStore::new(2));
        let mut replayed = 0u64;
        for entry in entries {
            let watermark = match entry.target {
                WalTarget::MemStore => manifest.memstore_flushed_seq,
                WalTarget::Delta => manifest.delta_flushed_seq,
            };
            if entry.lsn <= watermark {
                continue;
            }
            match entry.target {
                WalTarget::MemStore => memstore.apply(entry.key, entry.lsn, entry.change)?,
                WalTarget::Delta => delta_memstore.apply(entry.key, entry.lsn, entry.change)?,
            }
            replayed += 1;
        }

        let last_seq = loaded
            .delta_units
            .iter()
            .map(|u| u.meta().max_seq)
            .chain([
                recovery.last_lsn,
                manifest.memstore_flushed_seq,
                manifest.delta_flushed_seq,
            ])
            .max()
            .unwrap_or(0);

        let wal = WalWriter::open(
            &wal_dir,
            config.wal_sync_strategy,
            config.wal_segment_size,
            recovery.segments,
            last_seq,
        )?;

        let version = TabletVersion {
            memstore,
            frozen_memstores: Vec::new(),
            base_files: loaded.base_files,
            delta_memstore,
            frozen_deltas: Vec::new(),
            delta_units: loaded.delta_units,
        };

        let tablet_id = dir.display().to_string();
        let counters = status::tablet_counters(&tablet_id, name);

        let tablet = Self {
            name: name.to_string(),
            tablet_id,
            schema,
            config,
            data_dir,
            storage,
            wal: Mutex::new(wal),
            version: RwLock::new(Arc::new(version)),
            committed_seq: AtomicU64::new(last_seq),
            write_lock: Mutex::new(()),
            maintenance_lock: Mutex::new(()),
            manifest: Mutex::new(manifest),
            next_store_id: AtomicU64::new(3),
            counters,
        };

        if replayed > 0 {
            info!(tablet = name, replayed, "replayed WAL entries");
            if !tablet.current_version().memstore.is_empty() {
                tablet.flush_memstore()?;
            }
        }

        Ok(tablet)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn counters(&self) -> &Arc<TabletCounters> {
        &self.counters
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Highest sequence number visible to new readers
    pub fn committed_seq(&self) -> u64 {
        self.committed_seq.load(Ordering::Acquire)
    }

    /// The current version
    pub fn current_version(&self) -> Arc<TabletVersion> {
        Arc::clone(&self.version.read())
    }

    /// The current version plus the sequence number it is complete up to
    pub fn snapshot(&self) -> (Arc<TabletVersion>, u64) {
        let guard = self.version.read();
        (Arc::clone(&guard), self.committed_seq.load(Ordering::Acquire))
    }

    /// Copy of the last manifest written
    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Apply a batch of row operations in order
    ///
    /// Each row either succeeds or is reported in `row_errors`; a failed
    /// row never rolls back the rows before it. A WAL append failure fails
    /// the affected row and every row after it while the applied prefix is
    /// still published. After any WAL failure the log refuses further
    /// appends, so later batches report every row as failed until the
    /// tablet is reopened.
    pub fn write_batch(&self, ops: &[RowOperation]) -> Result<WriteOutcome> {
        let _txn = self.counters.transaction_started();
        let _write = self.write_lock.lock();

        // Freezes only happen under write_lock, so this version's active
        // stores stay active for the whole batch.
        let version = self.current_version();
        let mut wal = self.wal.lock();
        let mut seq = self.committed_seq.load(Ordering::Acquire);
        let mut outcome = WriteOutcome::default();
        let mut wal_failure: Option<TabletError> = None;

        for (idx, op) in ops.iter().enumerate() {
            if let Some(e) = &wal_failure {
                outcome.row_errors.push((idx, e.clone()));
                continue;
            }

            let (change, target) = match self.prepare(&version, op) {
                Ok(prepared) => prepared,
                Err(e) => {
                    debug!(tablet = %self.name, key = %op.key, error = %e, "row rejected");
                    outcome.row_errors.push((idx, e));
                    continue;
                }
            };

            let entry = WalEntry::new(seq + 1, op.key.clone(), change, target);
            if let Err(e) = wal.append(&entry) {
                let err = TabletError::Flush(format!("WAL append failed: {}", e));
                error!(tablet = %self.name, error = %e, "WAL append failed");
                outcome.row_errors.push((idx, err.clone()));
                wal_failure = Some(err);
                continue;
            }
            seq += 1;

            let applied = match target {
                WalTarget::MemStore => version.memstore.apply(entry.key, seq, entry.change),
                WalTarget::Delta => version.delta_memstore.apply(entry.key, seq, entry.change),
            };
            match applied {
                Ok(()) => outcome.applied += 1,
                Err(e) => outcome.row_errors.push((idx, e)),
            }
        }

        let synced = wal.commit();
        drop(wal);

        self.committed_seq.store(seq, Ordering::Release);
        self.counters.add_rows_written(outcome.applied as u64);

        if version.memstore.size() >= self.config.memstore_size_limit {
            self.freeze_memstore_locked();
        }
        if version.delta_memstore.size() >= self.config.delta_memstore_size_limit {
            self.freeze_delta_memstore_locked();
        }

        // The applied rows are already visible, so they stay reported as
        // applied; the poisoned log fails the next batch instead
        if let Err(e) = synced {
            error!(tablet = %self.name, seq, error = %e, "WAL sync failed");
        }
        Ok(outcome)
    }

    /// Validate one operation against the current row state and decide
    /// where its change goes
    fn prepare(&self, version: &TabletVersion, op: &RowOperation) -> Result<(RowChange, WalTarget)> {
        op.validate(&self.schema)?;

        let live = version.history(&op.key)?.fold(u64::MAX).is_some();
        match op.kind {
            MutationKind::Insert if live => return Err(TabletError::AlreadyPresent),
            MutationKind::Update | MutationKind::Delete if !live => {
                return Err(TabletError::NotFound)
            }
            _ => {}
        }

        let in_delta = version.has_delta_history(&op.key);
        let in_memstore = version.memstore.contains_key(&op.key);
        let target = if !in_delta && (in_memstore || !version.in_base_or_frozen(&op.key)) {
            WalTarget::MemStore
        } else {
            WalTarget::Delta
        };
        Ok((op.to_change(&self.schema), target))
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Look up a row as of the latest committed write
    pub fn get(&self, key: &RowKey) -> Result<Option<Row>> {
        let (version, snapshot) = self.snapshot();
        Ok(version
            .history(key)?
            .fold(snapshot)
            .map(|values| Row::new(Arc::clone(&self.schema), values)))
    }

    /// Open a scanner pinned to the current version and committed seq
    pub fn new_scanner(&self) -> Result<TabletScanner> {
        let (version, snapshot) = self.snapshot();
        TabletScanner::open(
            Arc::clone(&self.schema),
            version,
            snapshot,
            self.counters.scan_started(),
        )
    }

    // =========================================================================
    // Freezing
    // =========================================================================

    /// Freeze the active MemStore and install an empty one. Returns false
    /// if the active MemStore is empty.
    pub fn freeze_memstore(&self) -> bool {
        let _write = self.write_lock.lock();
        self.freeze_memstore_locked()
    }

    /// Freeze the active DeltaMemStore and install an empty one
    pub fn freeze_delta_memstore(&self) -> bool {
        let _write = self.write_lock.lock();
        self.freeze_delta_memstore_locked()
    }

    fn freeze_memstore_locked(&self) -> bool {
        let mut guard = self.version.write();
        if guard.memstore.is_empty() {
            return false;
        }
        let mut next = TabletVersion::clone(&guard);
        let fresh = Arc::new(MemStore::new(self.next_store_id()));
        let frozen = std::mem::replace(&mut next.memstore, fresh);
        frozen.freeze();
        debug!(tablet = %self.name, memstore = frozen.id(), bytes = frozen.size(), "memstore frozen");
        next.frozen_memstores.push(frozen);
        *guard = Arc::new(next);
        true
    }

    fn freeze_delta_memstore_locked(&self) -> bool {
        let mut guard = self.version.write();
        if guard.delta_memstore.is_empty() {
            return false;
        }
        let mut next = TabletVersion::clone(&guard);
        let fresh = Arc::new(DeltaMemStore::new(self.next_store_id()));
        let frozen = std::mem::replace(&mut next.delta_memstore, fresh);
        frozen.freeze();
        debug!(tablet = %self.name, delta_memstore = frozen.id(), bytes = frozen.size(), "delta memstore frozen");
        next.frozen_deltas.push(frozen);
        *guard = Arc::new(next);
        true
    }

    fn next_store_id(&self) -> u64 {
        self.next_store_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Write the oldest frozen MemStore (freezing the active one if none is
    /// frozen) to a base file. Returns false if there was nothing to flush.
    ///
    /// I/O failures are retried per `flush_backoff`; once retries are
    /// exhausted the MemStore stays frozen and readable, its rows stay in
    /// the WAL, and `TabletError::Flush` is returned.
    pub fn flush_memstore(&self) -> Result<bool> {
        let _maint = self.maintenance_lock.lock();

        let memstore = match self.current_version().frozen_memstores.first() {
            Some(ms) => Arc::clone(ms),
            None => {
                if !self.freeze_memstore() {
                    return Ok(false);
                }
                match self.current_version().frozen_memstores.first() {
                    Some(ms) => Arc::clone(ms),
                    None => return Ok(false),
                }
            }
        };

        let id = self.storage.allocate_file_id();
        let written = self.config.flush_backoff.retry(None, |attempt| {
            if attempt > 0 {
                warn!(tablet = %self.name, file_id = id, attempt, "retrying memstore flush");
            }
            self.write_memstore_file(&memstore, id).map_err(into_flush_error)
        });
        let base = match written {
            Ok(base) => base,
            Err(e) => {
                remove_quietly(&base_path(&self.data_dir, id));
                error!(tablet = %self.name, memstore = memstore.id(), error = %e, "memstore flush failed");
                return Err(into_flush_error(e));
            }
        };

        let flushed_seq = memstore.changes().max_seq();
        self.commit_manifest(|m| {
            if let Some(b) = &base {
                m.base_files.push(b.id());
            }
            m.memstore_flushed_seq = m.memstore_flushed_seq.max(flushed_seq);
        })
        .map_err(|e| {
            remove_quietly(&base_path(&self.data_dir, id));
            into_flush_error(e)
        })?;

        let rows = base.as_ref().map(|b| b.row_count()).unwrap_or(0);
        self.install(|v| {
            v.frozen_memstores.retain(|m| !Arc::ptr_eq(m, &memstore));
            if let Some(b) = base {
                v.base_files.push(b);
            }
        });

        memstore.retire();
        self.storage.retire(Retired::MemStore(Arc::clone(&memstore)));
        self.counters.memstore_flushed();
        info!(tablet = %self.name, memstore = memstore.id(), file_id = id, rows, flushed_seq, "memstore flushed");
        Ok(true)
    }

    fn write_memstore_file(&self, memstore: &MemStore, id: u64) -> Result<Option<Arc<BaseFile>>> {
        let mut writer = BaseFileWriter::create(&self.data_dir, id)?;
        for (key, changes) in memstore.changes().entries() {
            let mut history = RowHistory::new();
            history.extend(changes);
            if let Some(values) = history.fold(u64::MAX) {
                let record = BaseRecord {
                    as_of_seq: history.last_seq(),
                    values,
                };
                writer.add(&key, &record)?;
            }
        }
        if writer.row_count() == 0 {
            drop(writer);
            remove_quietly(&base_path(&self.data_dir, id));
            return Ok(None);
        }
        Ok(Some(Arc::new(writer.finish()?)))
    }

    /// Write the oldest frozen DeltaMemStore (freezing the active one if
    /// none is frozen) as a new delta unit
    pub fn flush_deltas(&self) -> Result<bool> {
        let _maint = self.maintenance_lock.lock();

        let dms = match self.current_version().frozen_deltas.first() {
            Some(d) => Arc::clone(d),
            None => {
                if !self.freeze_delta_memstore() {
                    return Ok(false);
                }
                match self.current_version().frozen_deltas.first() {
                    Some(d) => Arc::clone(d),
                    None => return Ok(false),
                }
            }
        };

        let id = self.storage.allocate_file_id();
        let written = self.config.flush_backoff.retry(None, |attempt| {
            if attempt > 0 {
                warn!(tablet = %self.name, file_id = id, attempt, "retrying delta flush");
            }
            DeltaUnit::write(&self.data_dir, id, dms.changes().entries()).map_err(into_flush_error)
        });
        let unit = match written {
            Ok(unit) => Arc::new(unit),
            Err(e) => {
                remove_quietly(&delta_path(&self.data_dir, id));
                error!(tablet = %self.name, delta_memstore = dms.id(), error = %e, "delta flush failed");
                return Err(into_flush_error(e));
            }
        };

        let meta = unit.meta().clone();
        self.commit_manifest(|m| {
            m.delta_units.push(meta.clone());
            m.delta_flushed_seq = m.delta_flushed_seq.max(meta.max_seq);
        })
        .map_err(|e| {
            remove_quietly(&delta_path(&self.data_dir, id));
            into_flush_error(e)
        })?;

        self.install(|v| {
            v.frozen_deltas.retain(|d| !Arc::ptr_eq(d, &dms));
            v.delta_units.push(Arc::clone(&unit));
        });

        self.storage.retire(Retired::DeltaMemStore(Arc::clone(&dms)));
        self.counters.delta_flushed();
        info!(
            tablet = %self.name,
            unit = meta.id,
            changes = meta.change_count,
            min_seq = meta.min_seq,
            max_seq = meta.max_seq,
            "deltas flushed"
        );
        Ok(true)
    }

    // =========================================================================
    // WAL Maintenance
    // =========================================================================

    /// Highest seq whose WAL entry is no longer needed for recovery
    pub fn wal_durable_seq(&self) -> u64 {
        let (version, committed) = self.snapshot();
        match version.min_unflushed_seq() {
            Some(seq) => seq.saturating_sub(1),
            None => committed,
        }
    }

    /// Segments and bytes a WAL GC would reclaim now
    pub fn wal_reclaimable(&self) -> (usize, u64) {
        let up_to = self.wal_durable_seq();
        self.wal.lock().reclaimable(up_to)
    }

    /// Delete WAL segments fully covered by flushed files
    pub fn gc_wal(&self) -> Result<usize> {
        let up_to = self.wal_durable_seq();
        self.wal.lock().gc(up_to)
    }

    pub fn wal_segment_count(&self) -> usize {
        self.wal.lock().segment_count()
    }

    /// Force the WAL to disk
    pub fn sync_wal(&self) -> Result<()> {
        self.wal.lock().sync()
    }

    /// Release retired files and stores that no snapshot references
    pub fn purge_retired(&self) -> usize {
        self.storage.purge_retired()
    }

    // =========================================================================
    // Shared Helpers (flush and compaction)
    // =========================================================================

    /// Apply `edit` to a copy of the manifest and persist it
    pub(super) fn commit_manifest(&self, edit: impl FnOnce(&mut Manifest)) -> Result<()> {
        let mut current = self.manifest.lock();
        let mut next = current.clone();
        edit(&mut next);
        self.storage.write_manifest(&mut next)?;
        *current = next;
        Ok(())
    }

    /// Install a new version derived from the current one
    pub(super) fn install(&self, edit: impl FnOnce(&mut TabletVersion)) {
        let mut guard = self.version.write();
        let mut next = TabletVersion::clone(&guard);
        edit(&mut next);
        *guard = Arc::new(next);
    }
}

impl Drop for Tablet {
    fn drop(&mut self) {
        if let Err(e) = self.wal.lock().sync() {
            warn!(tablet = %self.name, error = %e, "WAL sync on close failed");
        }
        status::unregister(&self.tablet_id);
    }
}

impl std::fmt::Debug for Tablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet")
            .field("name", &self.name)
            .field("committed_seq", &self.committed_seq())
            .finish()
    }
}

/// Flush retries treat every failure as transient
fn into_flush_error(e: TabletError) -> TabletError {
    match e {
        TabletError::Flush(_) => e,
        other => TabletError::Flush(other.to_string()),
    }
}

pub(super) fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial file");
        }
    }
}
