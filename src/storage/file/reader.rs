//! Sorted File Reader
//!
//! Opens sorted files and provides O(log n) key lookups via in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::schema::RowKey;
use crate::TabletError;

use super::iterator::SortedFileIterator;
use super::{le_u32, le_u64, FOOTER_SIZE, HEADER_SIZE, VERSION};

/// Reader for sorted files with in-memory index for O(log n) lookups
///
/// Point lookups share one file handle behind a Mutex; iterators open their
/// own handle so concurrent scans never contend on seek position.
pub struct SortedFileReader<V> {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    /// In-memory index: key → file offset
    index: BTreeMap<RowKey, u64>,
    entry_count: u64,
    /// Index block starting offset (end of data)
    index_offset: u64,
    file_size: u64,
    _record: PhantomData<fn() -> V>,
}

impl<V: DeserializeOwned> SortedFileReader<V> {
    /// Open a file for reading
    ///
    /// Validates the header and the data CRC, and loads the entire index
    /// into memory.
    pub fn open(path: &Path, magic: &[u8; 4]) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(TabletError::Storage(format!(
                "{} is too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != magic {
            return Err(TabletError::Storage(format!(
                "Invalid magic in {}: expected {:?}, got {:?}",
                path.display(),
                magic,
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(TabletError::Storage(format!(
                "Unsupported file version: {}",
                version
            )));
        }

        let entry_count = le_u64(&header, 6);

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = le_u64(&footer, 0);
        let data_crc = le_u32(&footer, 8);
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(TabletError::Storage(format!(
                "Index offset {} out of range in {}",
                index_offset,
                path.display()
            )));
        }

        // Verify the data block
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut data = vec![0u8; (index_offset - HEADER_SIZE) as usize];
        file.read_exact(&mut data)?;
        if crc32fast::hash(&data) != data_crc {
            return Err(TabletError::Storage(format!(
                "Data checksum mismatch in {}",
                path.display()
            )));
        }
        drop(data);

        // Index block size = file_size - footer_size - index_offset
        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact(&mut index_data)?;

        // Parse index entries: [key_len(4)][offset(8)][key]
        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos + 12 <= index_data.len() {
            let key_len = le_u32(&index_data, pos) as usize;
            let offset = le_u64(&index_data, pos + 4);
            pos += 12;
            if pos + key_len > index_data.len() {
                break;
            }
            let key: RowKey = bincode::deserialize(&index_data[pos..pos + key_len])?;
            pos += key_len;
            index.insert(key, offset);
        }

        if index.len() as u64 != entry_count {
            return Err(TabletError::Storage(format!(
                "Index of {} has {} entries, header says {}",
                path.display(),
                index.len(),
                entry_count
            )));
        }

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
            file_size,
            _record: PhantomData,
        })
    }

    /// Get a record by key through the in-memory index
    pub fn get(&self, key: &RowKey) -> Result<Option<V>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let key_len = le_u32(&header, 0) as i64;
        let val_len = le_u32(&header, 4) as usize;

        // Skip the key (we already know it matches)
        file.seek(SeekFrom::Current(key_len))?;

        let mut value = vec![0u8; val_len];
        file.read_exact(&mut value)?;
        Ok(Some(bincode::deserialize(&value)?))
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.index.keys()
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn min_key(&self) -> Option<&RowKey> {
        self.index.keys().next()
    }

    pub fn max_key(&self) -> Option<&RowKey> {
        self.index.keys().next_back()
    }

    /// Quick check if a key might be in this file (range check)
    pub fn might_contain(&self, key: &RowKey) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Iterate over all records in key order on a private file handle
    pub fn iter(&self) -> Result<SortedFileIterator<V>> {
        let file = File::open(&self.path)?;
        SortedFileIterator::new(BufReader::new(file), self.index_offset)
    }
}

impl<V> std::fmt::Debug for SortedFileReader<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedFileReader")
            .field("path", &self.path)
            .field("entry_count", &self.entry_count)
            .finish()
    }
}
