//! Delta unit files
//!
//! An immutable, key-ordered set of change histories. Units of a tablet
//! cover disjoint, ascending sequence ranges, so applying units oldest
//! first applies changes in sequence order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memstore::ChangeList;
use crate::schema::RowKey;
use crate::TabletError;

use super::file::{SortedFileBuilder, SortedFileIterator, SortedFileReader, DELTA_MAGIC};

/// Persisted description of a delta unit (kept in the manifest)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaUnitMeta {
    pub id: u64,
    pub min_seq: u64,
    pub max_seq: u64,
    pub change_count: u64,
}

/// An open delta unit
pub struct DeltaUnit {
    meta: DeltaUnitMeta,
    reader: SortedFileReader<ChangeList>,
}

impl DeltaUnit {
    pub fn open(dir: &Path, meta: DeltaUnitMeta) -> Result<Self> {
        let reader = SortedFileReader::open(&delta_path(dir, meta.id), DELTA_MAGIC)?;
        Ok(Self { meta, reader })
    }

    /// Write `entries` (ascending keys, each history ascending by seq) as
    /// unit `id`
    pub fn write<I>(dir: &Path, id: u64, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (RowKey, ChangeList)>,
    {
        let mut builder = SortedFileBuilder::new(&delta_path(dir, id), DELTA_MAGIC)?;
        let mut min_seq = u64::MAX;
        let mut max_seq = 0;
        let mut change_count = 0u64;

        for (key, changes) in entries {
            for (seq, _) in &changes {
                min_seq = min_seq.min(*seq);
                max_seq = max_seq.max(*seq);
            }
            change_count += changes.len() as u64;
            builder.add(&key, &changes)?;
        }
        if change_count == 0 {
            return Err(TabletError::Storage(format!(
                "refusing to write empty delta unit {}",
                id
            )));
        }
        builder.finish()?;

        Self::open(
            dir,
            DeltaUnitMeta {
                id,
                min_seq,
                max_seq,
                change_count,
            },
        )
    }

    pub fn meta(&self) -> &DeltaUnitMeta {
        &self.meta
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn get(&self, key: &RowKey) -> Result<Option<ChangeList>> {
        if !self.reader.might_contain(key) {
            return Ok(None);
        }
        self.reader.get(key)
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.reader.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.reader.keys()
    }

    pub fn iter(&self) -> Result<SortedFileIterator<ChangeList>> {
        self.reader.iter()
    }

    pub fn file_size(&self) -> u64 {
        self.reader.file_size()
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }
}

impl std::fmt::Debug for DeltaUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaUnit").field("meta", &self.meta).finish()
    }
}

/// "delta_000042.tdl" for id 42
pub fn delta_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("delta_{:06}.tdl", id))
}
