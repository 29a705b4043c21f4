//! Delta compaction
//!
//! - Minor: merge the oldest run of delta units into a single unit. Row
//!   contents are untouched; scans open fewer files.
//! - Major: fold the oldest run of delta units into the base rows they
//!   touch, writing one replacement base file. Dead rows are dropped.
//!
//! Both write their output before touching any shared state. On failure
//! the inputs remain listed in the manifest and the version, and the
//! partial output is deleted. Replaced inputs go to the retirement queue,
//! so scanners pinned to an older version keep reading them.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::memstore::ChangeList;
use crate::schema::RowKey;
use crate::storage::{base_path, delta_path, BaseFile, BaseFileWriter, BaseRecord, DeltaUnit, Retired};
use crate::TabletError;

use super::merge::{base_source, delta_source, MergingIterator, RowSource};
use super::tablet::{remove_quietly, Tablet};

/// Result of one compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionSummary {
    pub input_units: usize,
    pub input_base_files: usize,
    pub output_file_id: Option<u64>,
    pub rows_written: u64,
}

impl Tablet {
    /// Merge all current delta units into one. Returns `None` if fewer
    /// than two units exist.
    pub fn compact_deltas_minor(&self) -> Result<Option<CompactionSummary>> {
        let _maint = self.maintenance_lock.lock();

        let units: Vec<Arc<DeltaUnit>> = self.current_version().delta_units.clone();
        if units.len() < 2 {
            return Ok(None);
        }

        let id = self.storage.allocate_file_id();
        let merged = self.write_merged_unit(&units, id).map_err(|e| {
            remove_quietly(&delta_path(&self.data_dir, id));
            error!(tablet = %self.name, error = %e, "minor delta compaction failed");
            into_compaction_error(e)
        })?;
        let merged = Arc::new(merged);

        let input_ids: Vec<u64> = units.iter().map(|u| u.id()).collect();
        let meta = merged.meta().clone();
        self.commit_manifest(|m| {
            let pos = m.delta_units.iter().position(|u| input_ids.contains(&u.id)).unwrap_or(0);
            m.delta_units.retain(|u| !input_ids.contains(&u.id));
            m.delta_units.insert(pos, meta.clone());
        })
        .map_err(|e| {
            remove_quietly(&delta_path(&self.data_dir, id));
            into_compaction_error(e)
        })?;

        self.install(|v| {
            let pos = v
                .delta_units
                .iter()
                .position(|u| input_ids.contains(&u.id()))
                .unwrap_or(0);
            v.delta_units.retain(|u| !input_ids.contains(&u.id()));
            v.delta_units.insert(pos, Arc::clone(&merged));
        });

        for unit in &units {
            self.storage.retire(Retired::Delta(Arc::clone(unit)));
        }
        self.counters.minor_compacted();
        info!(
            tablet = %self.name,
            inputs = units.len(),
            output = id,
            changes = meta.change_count,
            "minor delta compaction complete"
        );

        Ok(Some(CompactionSummary {
            input_units: units.len(),
            input_base_files: 0,
            output_file_id: Some(id),
            rows_written: 0,
        }))
    }

    fn write_merged_unit(&self, units: &[Arc<DeltaUnit>], id: u64) -> Result<DeltaUnit> {
        let sources = units
            .iter()
            .map(|u| u.iter().map(delta_source))
            .collect::<Result<Vec<RowSource>>>()?;

        let mut entries: Vec<(RowKey, ChangeList)> = Vec::new();
        for item in MergingIterator::new(sources)? {
            let (key, mut history) = item?;
            history.changes.sort_by_key(|(seq, _)| *seq);
            entries.push((key, history.changes));
        }
        DeltaUnit::write(&self.data_dir, id, entries)
    }

    /// Fold all current delta units into the base rows they touch.
    ///
    /// Returns `None` if there are no delta units, or if a frozen MemStore
    /// is waiting to be flushed (its rows may have changes in the units
    /// but no base record yet).
    pub fn compact_deltas_major(&self) -> Result<Option<CompactionSummary>> {
        let _maint = self.maintenance_lock.lock();

        let version = self.current_version();
        if version.delta_units.is_empty() {
            return Ok(None);
        }
        if !version.frozen_memstores.is_empty() {
            debug!(tablet = %self.name, "major compaction deferred: frozen memstore pending flush");
            return Ok(None);
        }

        let units: Vec<Arc<DeltaUnit>> = version.delta_units.clone();
        let bases = version.touched_base_files();

        let id = self.storage.allocate_file_id();
        let output = self.write_folded_base(&bases, &units, id).map_err(|e| {
            remove_quietly(&base_path(&self.data_dir, id));
            error!(tablet = %self.name, error = %e, "major delta compaction failed");
            into_compaction_error(e)
        })?;

        let unit_ids: Vec<u64> = units.iter().map(|u| u.id()).collect();
        let base_ids: Vec<u64> = bases.iter().map(|b| b.id()).collect();
        let output_id = output.as_ref().map(|b| b.id());
        self.commit_manifest(|m| {
            m.delta_units.retain(|u| !unit_ids.contains(&u.id));
            m.base_files.retain(|b| !base_ids.contains(b));
            if let Some(out) = output_id {
                m.base_files.push(out);
            }
        })
        .map_err(|e| {
            remove_quietly(&base_path(&self.data_dir, id));
            into_compaction_error(e)
        })?;

        let rows_written = output.as_ref().map(|b| b.row_count()).unwrap_or(0);
        self.install(|v| {
            v.delta_units.retain(|u| !unit_ids.contains(&u.id()));
            v.base_files.retain(|b| !base_ids.contains(&b.id()));
            if let Some(out) = output {
                v.base_files.push(out);
            }
        });

        for unit in &units {
            self.storage.retire(Retired::Delta(Arc::clone(unit)));
        }
        for base in &bases {
            self.storage.retire(Retired::Base(Arc::clone(base)));
        }
        self.counters.major_compacted();
        info!(
            tablet = %self.name,
            units = units.len(),
            base_files = bases.len(),
            output = ?output_id,
            rows = rows_written,
            "major delta compaction complete"
        );

        Ok(Some(CompactionSummary {
            input_units: units.len(),
            input_base_files: bases.len(),
            output_file_id: output_id,
            rows_written,
        }))
    }

    fn write_folded_base(
        &self,
        bases: &[Arc<BaseFile>],
        units: &[Arc<DeltaUnit>],
        id: u64,
    ) -> Result<Option<Arc<BaseFile>>> {
        let mut sources = Vec::with_capacity(bases.len() + units.len());
        for base in bases {
            sources.push(base_source(base.iter()?));
        }
        for unit in units {
            sources.push(delta_source(unit.iter()?));
        }

        let mut writer = BaseFileWriter::create(&self.data_dir, id)?;
        for item in MergingIterator::new(sources)? {
            let (key, history) = item?;
            if let Some(values) = history.fold(u64::MAX) {
                let record = BaseRecord {
                    as_of_seq: history.last_seq(),
                    values,
                };
                writer.add(&key, &record)?;
            }
        }

        if writer.row_count() == 0 {
            drop(writer);
            remove_quietly(&base_path(&self.data_dir, id));
            return Ok(None);
        }
        Ok(Some(Arc::new(writer.finish()?)))
    }
}

fn into_compaction_error(e: TabletError) -> TabletError {
    match e {
        TabletError::Compaction(_) => e,
        other => TabletError::Compaction(other.to_string()),
    }
}
