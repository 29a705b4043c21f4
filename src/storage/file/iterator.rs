//! Sorted File Iterator
//!
//! Sequential iteration over all entries in a sorted file.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::schema::RowKey;

use super::{le_u32, HEADER_SIZE};

/// Iterator over file entries in sorted key order
pub struct SortedFileIterator<V> {
    file: BufReader<File>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Current position in file
    current_offset: u64,
    failed: bool,
    _record: PhantomData<fn() -> V>,
}

impl<V: DeserializeOwned> SortedFileIterator<V> {
    /// Create a new iterator starting from the data block
    pub(super) fn new(mut file: BufReader<File>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
            failed: false,
            _record: PhantomData,
        })
    }

    fn read_entry(&mut self) -> Result<(RowKey, V)> {
        let mut header = [0u8; 8];
        self.file.read_exact(&mut header)?;
        let key_len = le_u32(&header, 0) as usize;
        let val_len = le_u32(&header, 4) as usize;

        let mut buf = vec![0u8; key_len + val_len];
        self.file.read_exact(&mut buf)?;
        self.current_offset += 8 + buf.len() as u64;

        let key = bincode::deserialize(&buf[..key_len])?;
        let value = bincode::deserialize(&buf[key_len..])?;
        Ok((key, value))
    }
}

impl<V: DeserializeOwned> Iterator for SortedFileIterator<V> {
    type Item = Result<(RowKey, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop at index block, or after the first error
        if self.failed || self.current_offset >= self.end_offset {
            return None;
        }
        let entry = self.read_entry();
        if entry.is_err() {
            self.failed = true;
        }
        Some(entry)
    }
}
