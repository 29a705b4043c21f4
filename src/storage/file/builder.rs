//! Sorted File Builder
//!
//! Writes sorted key/record entries to a new file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::schema::RowKey;
use crate::TabletError;

use super::{FileMeta, HEADER_SIZE, VERSION};

/// Builder for creating new sorted files
pub struct SortedFileBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: encoded key → file offset of entry
    index: Vec<(Vec<u8>, u64)>,
    /// Track min/max keys for metadata and ordering checks
    min_key: Option<RowKey>,
    max_key: Option<RowKey>,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
}

impl SortedFileBuilder {
    /// Create a new builder
    ///
    /// Writes header immediately; call `add()` in ascending key order,
    /// then `finish()` to write index and footer.
    pub fn new(path: &Path, magic: &[u8; 4]) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        // Entry count is patched in finish()
        writer.write_all(magic)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            min_key: None,
            max_key: None,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Add a record (keys must be strictly ascending)
    pub fn add<V: Serialize>(&mut self, key: &RowKey, value: &V) -> Result<()> {
        if let Some(last) = &self.max_key {
            if key <= last {
                return Err(TabletError::Storage(format!(
                    "keys out of order in {}: {} after {}",
                    self.path.display(),
                    key,
                    last
                )));
            }
        }

        let key_bytes = bincode::serialize(key)?;
        let val_bytes = bincode::serialize(value)?;

        self.index.push((key_bytes.clone(), self.current_offset));
        if self.min_key.is_none() {
            self.min_key = Some(key.clone());
        }
        self.max_key = Some(key.clone());

        // [key_len(4)][val_len(4)][key][value]
        let key_len_bytes = (key_bytes.len() as u32).to_le_bytes();
        let val_len_bytes = (val_bytes.len() as u32).to_le_bytes();

        for part in [&key_len_bytes[..], &val_len_bytes[..], &key_bytes[..], &val_bytes[..]] {
            self.writer.write_all(part)?;
            self.data_hasher.update(part);
        }

        self.current_offset += 8 + key_bytes.len() as u64 + val_bytes.len() as u64;
        self.entry_count += 1;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finish building: write index block, footer, and return metadata
    pub fn finish(mut self) -> Result<FileMeta> {
        let index_offset = self.current_offset;

        // Index block: [key_len(4)][offset(8)][key] for each entry
        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        let data_crc = self.data_hasher.finalize();

        // Footer: index_offset (8) + data_crc (4) + padding (4)
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;

        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| {
            TabletError::Storage(format!("Failed to flush {}: {}", self.path.display(), e))
        })?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(FileMeta {
            path: self.path,
            entry_count: self.entry_count,
            min_key: self.min_key,
            max_key: self.max_key,
            file_size,
        })
    }
}
