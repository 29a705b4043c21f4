//! Tablet versions
//!
//! A `TabletVersion` is an immutable list of everything a read has to
//! consult. Flush, freeze and compaction never modify a version; they
//! install a new one. A scanner pins a version by holding its `Arc`, which
//! keeps every file and store it lists alive.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::memstore::{DeltaMemStore, MemStore};
use crate::schema::RowKey;
use crate::storage::{BaseFile, DeltaUnit};

use super::fold::RowHistory;
use super::merge::{base_source, delta_source, MapCursor, MapOwner, MergingIterator};

#[derive(Debug, Clone)]
pub struct TabletVersion {
    /// Accepting new rows
    pub memstore: Arc<MemStore>,
    /// Frozen, waiting for flush, oldest first
    pub frozen_memstores: Vec<Arc<MemStore>>,
    /// Each live key is stored in at most one base file
    pub base_files: Vec<Arc<BaseFile>>,
    /// Accepting changes to stored rows
    pub delta_memstore: Arc<DeltaMemStore>,
    /// Frozen, waiting for delta flush, oldest first
    pub frozen_deltas: Vec<Arc<DeltaMemStore>>,
    /// Flushed delta units with ascending, disjoint seq ranges
    pub delta_units: Vec<Arc<DeltaUnit>>,
}

impl TabletVersion {
    /// Gather a key's history from every source
    pub fn history(&self, key: &RowKey) -> Result<RowHistory> {
        let mut history = RowHistory::new();

        for base in &self.base_files {
            if let Some(record) = base.get(key)? {
                history.base = Some(record);
                break;
            }
        }
        for unit in &self.delta_units {
            if let Some(changes) = unit.get(key)? {
                history.extend(changes);
            }
        }
        for ms in self.frozen_memstores.iter().chain(std::iter::once(&self.memstore)) {
            if let Some(changes) = ms.history(key) {
                history.extend(changes);
            }
        }
        for dms in self.frozen_deltas.iter().chain(std::iter::once(&self.delta_memstore)) {
            if let Some(changes) = dms.history(key) {
                history.extend(changes);
            }
        }
        Ok(history)
    }

    /// Whether any delta store (in memory or flushed) mentions `key`
    pub fn has_delta_history(&self, key: &RowKey) -> bool {
        self.delta_memstore.contains_key(key)
            || self.frozen_deltas.iter().any(|d| d.contains_key(key))
            || self.delta_units.iter().any(|u| u.contains_key(key))
    }

    /// Whether `key` is stored outside the active MemStore and delta stores
    pub fn in_base_or_frozen(&self, key: &RowKey) -> bool {
        self.base_files.iter().any(|b| b.contains_key(key))
            || self.frozen_memstores.iter().any(|m| m.contains_key(key))
    }

    /// Merge every source of this version in key order
    pub fn merge_all(&self) -> Result<MergingIterator> {
        let mut sources = Vec::new();
        for base in &self.base_files {
            sources.push(base_source(base.iter()?));
        }
        for unit in &self.delta_units {
            sources.push(delta_source(unit.iter()?));
        }
        for ms in self.frozen_memstores.iter().chain(std::iter::once(&self.memstore)) {
            sources.push(MapCursor::new(MapOwner::MemStore(Arc::clone(ms))).into_source());
        }
        for dms in self.frozen_deltas.iter().chain(std::iter::once(&self.delta_memstore)) {
            sources.push(MapCursor::new(MapOwner::Delta(Arc::clone(dms))).into_source());
        }
        MergingIterator::new(sources)
    }

    /// Bytes held by MemStores (active + frozen)
    pub fn memstore_bytes(&self) -> usize {
        self.memstore.size() + self.frozen_memstores.iter().map(|m| m.size()).sum::<usize>()
    }

    /// Bytes held by DeltaMemStores (active + frozen)
    pub fn delta_memstore_bytes(&self) -> usize {
        self.delta_memstore.size() + self.frozen_deltas.iter().map(|d| d.size()).sum::<usize>()
    }

    /// Lowest seq still held only in memory, if any
    pub fn min_unflushed_seq(&self) -> Option<u64> {
        let mems = self
            .frozen_memstores
            .iter()
            .chain(std::iter::once(&self.memstore))
            .filter_map(|m| m.changes().min_seq());
        let deltas = self
            .frozen_deltas
            .iter()
            .chain(std::iter::once(&self.delta_memstore))
            .filter_map(|d| d.changes().min_seq());
        mems.chain(deltas).min()
    }

    pub fn delta_change_count(&self) -> u64 {
        self.delta_units.iter().map(|u| u.meta().change_count).sum()
    }

    pub fn base_row_count(&self) -> u64 {
        self.base_files.iter().map(|b| b.row_count()).sum()
    }

    /// Base files holding at least one key changed by a delta unit; the
    /// files a major compaction rewrites
    pub fn touched_base_files(&self) -> Vec<Arc<BaseFile>> {
        let touched: BTreeSet<&RowKey> = self.delta_units.iter().flat_map(|u| u.keys()).collect();
        self.base_files
            .iter()
            .filter(|b| touched.iter().any(|k| b.contains_key(k)))
            .cloned()
            .collect()
    }
}
