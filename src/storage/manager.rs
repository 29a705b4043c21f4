//! Storage Manager
//!
//! Owns a tablet's data directory.
//!
//! ## Responsibilities
//! - Open the files listed in the manifest on startup
//! - Delete orphan files left behind by an interrupted flush or compaction
//! - Hand out file ids
//! - Persist the manifest
//! - Track retired files and memory stores until no snapshot references them

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memstore::{DeltaMemStore, MemStore};

use super::{BaseFile, DeltaUnit, Manifest};

/// Something replaced by a newer tablet version
///
/// Held here until the retirement queue's reference is the last one, at
/// which point `purge_retired` frees it (and deletes its file, if any).
pub enum Retired {
    Base(Arc<BaseFile>),
    Delta(Arc<DeltaUnit>),
    MemStore(Arc<MemStore>),
    DeltaMemStore(Arc<DeltaMemStore>),
}

impl Retired {
    fn is_unreferenced(&self) -> bool {
        match self {
            Retired::Base(f) => Arc::strong_count(f) == 1,
            Retired::Delta(u) => Arc::strong_count(u) == 1,
            Retired::MemStore(m) => Arc::strong_count(m) == 1,
            Retired::DeltaMemStore(d) => Arc::strong_count(d) == 1,
        }
    }

    fn file_path(&self) -> Option<PathBuf> {
        match self {
            Retired::Base(f) => Some(f.path().to_path_buf()),
            Retired::Delta(u) => Some(u.path().to_path_buf()),
            _ => None,
        }
    }
}

/// Files loaded at open
pub struct LoadedFiles {
    pub manifest: Manifest,
    pub base_files: Vec<Arc<BaseFile>>,
    pub delta_units: Vec<Arc<DeltaUnit>>,
}

/// Manages the storage layer of one tablet
///
/// ## Concurrency:
/// - `next_file_id`: Atomic counter (lock-free)
/// - `retired`: Mutex-protected queue
/// - `manifest_lock`: serializes manifest rewrites
/// - All methods use `&self`
pub struct StorageManager {
    /// Directory holding base/delta files and the manifest
    data_dir: PathBuf,

    next_file_id: AtomicU64,

    retired: Mutex<Vec<Retired>>,

    manifest_lock: Mutex<()>,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Load the manifest (empty for a new tablet)
    /// 3. Open readers for listed files (loads indexes into RAM)
    /// 4. Delete files the manifest does not list
    pub fn open(path: &Path) -> Result<(Self, LoadedFiles)> {
        fs::create_dir_all(path)?;

        let manifest = Manifest::load(path)?.unwrap_or_else(|| Manifest {
            next_file_id: 1,
            ..Manifest::default()
        });

        let base_files = manifest
            .base_files
            .iter()
            .map(|id| BaseFile::open(path, *id).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let delta_units = manifest
            .delta_units
            .iter()
            .map(|meta| DeltaUnit::open(path, meta.clone()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let mut max_seen = 0;
        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            let Some((kind, id)) = parse_file_id(&file_path) else {
                continue;
            };
            max_seen = max_seen.max(id);
            let listed = match kind {
                FileKind::Base => manifest.base_files.contains(&id),
                FileKind::Delta => manifest.delta_units.iter().any(|m| m.id == id),
            };
            if !listed {
                warn!(path = %file_path.display(), "removing orphan file");
                fs::remove_file(&file_path)?;
            }
        }

        let next_id = manifest.next_file_id.max(max_seen + 1).max(1);
        info!(
            dir = %path.display(),
            base_files = base_files.len(),
            delta_units = delta_units.len(),
            next_id,
            "storage opened"
        );

        Ok((
            Self {
                data_dir: path.to_path_buf(),
                next_file_id: AtomicU64::new(next_id),
                retired: Mutex::new(Vec::new()),
                manifest_lock: Mutex::new(()),
            },
            LoadedFiles {
                manifest,
                base_files,
                delta_units,
            },
        ))
    }

    /// Allocate a new file id (atomic, lock-free)
    pub fn allocate_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Next id that would be allocated
    pub fn next_file_id(&self) -> u64 {
        self.next_file_id.load(Ordering::SeqCst)
    }

    /// Persist `manifest`, stamping the current next file id
    pub fn write_manifest(&self, manifest: &mut Manifest) -> Result<()> {
        let _guard = self.manifest_lock.lock();
        manifest.next_file_id = self.next_file_id();
        manifest.store(&self.data_dir)
    }

    /// Queue a replaced object for deferred release
    pub fn retire(&self, item: Retired) {
        self.retired.lock().push(item);
    }

    /// Free every retired object nobody references any more; returns how
    /// many were released
    pub fn purge_retired(&self) -> usize {
        let ready: Vec<Retired> = {
            let mut retired = self.retired.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                retired.drain(..).partition(Retired::is_unreferenced);
            *retired = pending;
            ready
        };

        let released = ready.len();
        for item in ready {
            let path = item.file_path();
            drop(item);
            if let Some(path) = path {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "retired file deleted"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to delete retired file"),
                }
            }
        }
        released
    }

    /// Objects waiting for their last reader
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

enum FileKind {
    Base,
    Delta,
}

/// "base_000042.tbs" → (Base, 42), "delta_000007.tdl" → (Delta, 7)
fn parse_file_id(path: &Path) -> Option<(FileKind, u64)> {
    let ext = path.extension()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    match ext {
        "tbs" => Some((FileKind::Base, stem.strip_prefix("base_")?.parse().ok()?)),
        "tdl" => Some((FileKind::Delta, stem.strip_prefix("delta_")?.parse().ok()?)),
        _ => None,
    }
}
