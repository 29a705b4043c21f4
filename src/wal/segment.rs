//! WAL segment naming and discovery

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A WAL segment on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: u64,
    pub path: PathBuf,
    /// Highest LSN written to the segment (0 if empty)
    pub max_lsn: u64,
}

/// "wal_000042.log" for id 42
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal_{:06}.log", id))
}

/// "wal_000042.log" → Some(42)
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    if path.extension()? != "log" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("wal_")?.parse().ok()
}

/// Segment ids present in `dir`, ascending
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_segment_id(&path) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
