//! Base rowset files
//!
//! A base file holds one record per live row: its full column values and
//! the sequence number they are current as of. Changes with a higher
//! sequence number live in delta stores and are applied on read.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::{RowKey, Value};

use super::file::{SortedFileBuilder, SortedFileIterator, SortedFileReader, BASE_MAGIC};

/// Stored state of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRecord {
    /// Every change with seq <= as_of_seq is already folded into `values`
    pub as_of_seq: u64,
    pub values: Vec<Value>,
}

/// An open, immutable base file
pub struct BaseFile {
    id: u64,
    reader: SortedFileReader<BaseRecord>,
}

impl BaseFile {
    pub fn open(dir: &Path, id: u64) -> Result<Self> {
        let reader = SortedFileReader::open(&base_path(dir, id), BASE_MAGIC)?;
        Ok(Self { id, reader })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn get(&self, key: &RowKey) -> Result<Option<BaseRecord>> {
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

    pub fn iter(&self) -> Result<SortedFileIterator<BaseRecord>> {
        self.reader.iter()
    }

    pub fn row_count(&self) -> u64 {
        self.reader.entry_count()
    }

    pub fn file_size(&self) -> u64 {
        self.reader.file_size()
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }
}

impl std::fmt::Debug for BaseFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseFile")
            .field("id", &self.id)
            .field("rows", &self.row_count())
            .finish()
    }
}

/// Streams rows into a new base file
pub struct BaseFileWriter {
    dir: PathBuf,
    id: u64,
    builder: SortedFileBuilder,
}

impl BaseFileWriter {
    pub fn create(dir: &Path, id: u64) -> Result<Self> {
        let builder = SortedFileBuilder::new(&base_path(dir, id), BASE_MAGIC)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            id,
            builder,
        })
    }

    /// Append a row (ascending key order)
    pub fn add(&mut self, key: &RowKey, record: &BaseRecord) -> Result<()> {
        self.builder.add(key, record)
    }

    pub fn row_count(&self) -> u64 {
        self.builder.entry_count()
    }

    /// Seal the file and open it for reading
    pub fn finish(self) -> Result<BaseFile> {
        self.builder.finish()?;
        BaseFile::open(&self.dir, self.id)
    }
}

/// "base_000042.tbs" for id 42
pub fn base_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("base_{:06}.tbs", id))
}
