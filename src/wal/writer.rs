//! WAL Writer
//!
//! Handles appending entries to the active WAL segment, rolling to a new
//! segment once the size limit is reached, and deleting segments whose
//! entries are all durable elsewhere.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::WalSyncStrategy;
use crate::error::Result;
use crate::TabletError;

use super::segment::{segment_path, SegmentInfo};
use super::WalEntry;

/// Writes entries to the WAL
pub struct WalWriter {
    dir: PathBuf,
    sync_strategy: WalSyncStrategy,
    segment_size: u64,

    /// Active segment
    writer: BufWriter<File>,
    current: SegmentInfo,
    current_size: u64,

    /// Closed segments, ascending by id
    sealed: Vec<SegmentInfo>,

    /// Entries appended since the last fsync
    unsynced: usize,
    last_lsn: u64,

    /// Set by the first append or commit failure. The segment may end in a
    /// torn entry, so nothing more is appended until the tablet reopens.
    failed: Option<String>,

    #[cfg(test)]
    fail_after_lsn: Option<u64>,
}

impl WalWriter {
    /// Open the WAL in `dir`, keeping `existing` segments (from recovery) as
    /// sealed and starting a fresh active segment after them.
    pub fn open(
        dir: &Path,
        sync_strategy: WalSyncStrategy,
        segment_size: u64,
        existing: Vec<SegmentInfo>,
        last_lsn: u64,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let next_id = existing.last().map(|s| s.id + 1).unwrap_or(1);
        let (writer, current) = Self::create_segment(dir, next_id)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            sync_strategy,
            segment_size,
            writer,
            current,
            current_size: 0,
            sealed: existing,
            unsynced: 0,
            last_lsn,
            failed: None,
            #[cfg(test)]
            fail_after_lsn: None,
        })
    }

    /// Append an entry to the active segment (buffered)
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if let Some(reason) = &self.failed {
            return Err(TabletError::Storage(format!("WAL unavailable: {}", reason)));
        }
        #[cfg(test)]
        if self.fail_after_lsn.is_some_and(|lsn| entry.lsn > lsn) {
            let e = std::io::Error::new(std::io::ErrorKind::Other, "simulated write failure");
            return Err(self.poison(e.into()));
        }
        if entry.lsn <= self.last_lsn {
            return Err(TabletError::WalCorruption(format!(
                "append of lsn {} after {}",
                entry.lsn, self.last_lsn
            )));
        }
        let bytes = entry.encode()?;
        if let Err(e) = self.writer.write_all(&bytes) {
            return Err(self.poison(e.into()));
        }

        self.current_size += bytes.len() as u64;
        self.current.max_lsn = entry.lsn;
        self.last_lsn = entry.lsn;
        self.unsynced += 1;
        Ok(())
    }

    /// End of a write batch: push buffered bytes to the OS, fsync per the
    /// sync strategy, and roll the segment if it is full.
    pub fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.commit_inner() {
            return Err(self.poison(e));
        }
        Ok(())
    }

    fn commit_inner(&mut self) -> Result<()> {
        self.writer.flush()?;
        let must_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => self.unsynced > 0,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
        };
        if must_sync {
            self.sync()?;
        }
        if self.current_size >= self.segment_size {
            self.roll()?;
        }
        Ok(())
    }

    /// Whether an earlier failure stopped further appends
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    fn poison(&mut self, e: TabletError) -> TabletError {
        if self.failed.is_none() {
            self.failed = Some(e.to_string());
        }
        e
    }

    /// Make appends above `lsn` fail as if the disk had rejected them
    #[cfg(test)]
    pub(crate) fn fail_appends_after(&mut self, lsn: u64) {
        self.fail_after_lsn = Some(lsn);
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Seal the active segment and open the next one
    pub fn roll(&mut self) -> Result<()> {
        self.sync()?;
        let (writer, next) = Self::create_segment(&self.dir, self.current.id + 1)?;
        let sealed = std::mem::replace(&mut self.current, next);
        self.writer = writer;
        self.current_size = 0;
        debug!(segment = sealed.id, max_lsn = sealed.max_lsn, "WAL segment sealed");
        self.sealed.push(sealed);
        Ok(())
    }

    /// Number of segments and bytes `gc(up_to_lsn)` would reclaim
    pub fn reclaimable(&self, up_to_lsn: u64) -> (usize, u64) {
        let mut count = 0;
        let mut bytes = 0;
        for seg in self.sealed.iter().filter(|s| s.max_lsn <= up_to_lsn) {
            count += 1;
            bytes += fs::metadata(&seg.path).map(|m| m.len()).unwrap_or(0);
        }
        if self.current_size > 0 && self.current.max_lsn <= up_to_lsn {
            count += 1;
            bytes += self.current_size;
        }
        (count, bytes)
    }

    /// Delete every segment whose entries all have LSN <= `up_to_lsn`.
    /// The active segment is rolled first if it is fully covered.
    pub fn gc(&mut self, up_to_lsn: u64) -> Result<usize> {
        if self.current_size > 0 && self.current.max_lsn <= up_to_lsn {
            self.roll()?;
        }

        let mut removed = 0;
        let mut failure = None;
        let segments = std::mem::take(&mut self.sealed);
        for seg in segments {
            if failure.is_none() && seg.max_lsn <= up_to_lsn {
                match fs::remove_file(&seg.path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => removed += 1,
                    Err(e) => {
                        failure = Some(e);
                        self.sealed.push(seg);
                    }
                }
            } else {
                self.sealed.push(seg);
            }
        }
        if let Some(e) = failure {
            return Err(e.into());
        }

        if removed > 0 {
            info!(removed, up_to_lsn, "WAL segments deleted");
        }
        Ok(removed)
    }

    /// Get the last appended LSN
    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    /// Sealed segments plus the active one
    pub fn segment_count(&self) -> usize {
        self.sealed.len() + 1
    }

    fn create_segment(dir: &Path, id: u64) -> Result<(BufWriter<File>, SegmentInfo)> {
        let path = segment_path(dir, id);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            BufWriter::new(file),
            SegmentInfo {
                id,
                path,
                max_lsn: 0,
            },
        ))
    }
}
