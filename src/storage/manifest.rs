//! Tablet manifest
//!
//! The manifest is the single source of truth for which files make up a
//! tablet. It is replaced atomically (write temp file, fsync, rename), so a
//! crash leaves either the old or the new file set.
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────┐
//! │ CRC (4)  │ Len (4)  │ bincode(Manifest)   │
//! └──────────┴──────────┴─────────────────────┘
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::TabletError;

use super::delta::DeltaUnitMeta;

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Live base files, oldest first
    pub base_files: Vec<u64>,
    /// Live delta units, oldest first
    pub delta_units: Vec<DeltaUnitMeta>,
    pub next_file_id: u64,
    /// Every MemStore-routed change with seq <= this is in a base file
    pub memstore_flushed_seq: u64,
    /// Every delta-routed change with seq <= this is in a delta unit or
    /// folded into a base file
    pub delta_flushed_seq: u64,
}

impl Manifest {
    /// Load the manifest from `dir`, or `None` for a fresh tablet
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < 8 {
            return Err(TabletError::Storage("manifest is truncated".to_string()));
        }
        let crc = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let payload = bytes
            .get(8..8 + len)
            .ok_or_else(|| TabletError::Storage("manifest is truncated".to_string()))?;
        if crc32fast::hash(payload) != crc {
            return Err(TabletError::Storage("manifest checksum mismatch".to_string()));
        }
        Ok(Some(bincode::deserialize(payload)?))
    }

    /// Atomically replace the manifest in `dir`
    pub fn store(&self, dir: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let tmp = dir.join(MANIFEST_TMP);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            file.write_all(&(payload.len() as u32).to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// Lowest watermark: WAL entries at or below it are durable in files
    pub fn durable_seq(&self) -> u64 {
        self.memstore_flushed_seq.min(self.delta_flushed_seq)
    }
}
