//! WAL Reader
//!
//! Handles reading entries from a single WAL segment.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;

use super::{WalEntry, HEADER_SIZE};

/// Outcome of reading one framed entry
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete entry with a valid checksum
    Entry(WalEntry),
    /// Clean end of segment
    Eof,
    /// Partial header/payload or checksum mismatch at this offset
    Torn { offset: u64, reason: String },
}

/// Reads entries from a WAL segment file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset of the next unread byte (end of the last valid entry)
    position: u64,
}

impl WalReader {
    /// Open a WAL segment for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Byte offset just past the last valid entry read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next entry from the segment
    pub fn next_entry(&mut self) -> Result<ReadOutcome> {
        let start = self.position;

        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(ReadOutcome::Eof),
            n if n < HEADER_SIZE => {
                return Ok(ReadOutcome::Torn {
                    offset: start,
                    reason: format!("partial header ({} bytes)", n),
                })
            }
            _ => {}
        }

        let lsn = u64::from_le_bytes(header[0..8].try_into().unwrap_or([0; 8]));
        let crc = u32::from_le_bytes(header[8..12].try_into().unwrap_or([0; 4]));
        let len = u32::from_le_bytes(header[12..16].try_into().unwrap_or([0; 4])) as usize;

        let mut payload = vec![0u8; len];
        let n = read_full(&mut self.reader, &mut payload)?;
        if n < len {
            return Ok(ReadOutcome::Torn {
                offset: start,
                reason: format!("partial payload ({} of {} bytes)", n, len),
            });
        }

        if crc32fast::hash(&payload) != crc {
            return Ok(ReadOutcome::Torn {
                offset: start,
                reason: format!("checksum mismatch at lsn {}", lsn),
            });
        }

        let entry = match WalEntry::decode_payload(&payload) {
            Ok(entry) if entry.lsn == lsn => entry,
            Ok(entry) => {
                return Ok(ReadOutcome::Torn {
                    offset: start,
                    reason: format!("header lsn {} disagrees with payload lsn {}", lsn, entry.lsn),
                })
            }
            Err(e) => {
                return Ok(ReadOutcome::Torn {
                    offset: start,
                    reason: e.to_string(),
                })
            }
        };

        self.position = start + (HEADER_SIZE + len) as u64;
        Ok(ReadOutcome::Entry(entry))
    }

    /// Iterate over valid entries, stopping at the first torn one
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over the valid prefix of a segment
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(ReadOutcome::Entry(entry)) => Some(Ok(entry)),
            Ok(ReadOutcome::Eof) | Ok(ReadOutcome::Torn { .. }) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
