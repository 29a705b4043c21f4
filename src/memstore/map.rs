//! Versioned change map
//!
//! BTreeMap-based map from row key to its ordered change history, with an
//! RwLock for concurrency. Backs both the MemStore and the DeltaMemStore.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::mutation::RowChange;
use crate::schema::RowKey;

/// Ordered `(seq, change)` list for one key, ascending by seq
pub type ChangeList = Vec<(u64, RowChange)>;

/// In-memory key → change history map
pub struct ChangeMap {
    data: RwLock<BTreeMap<RowKey, ChangeList>>,
    /// Approximate size in bytes
    size: AtomicUsize,
    change_count: AtomicUsize,
    min_seq: AtomicU64,
    max_seq: AtomicU64,
}

impl ChangeMap {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            change_count: AtomicUsize::new(0),
            min_seq: AtomicU64::new(u64::MAX),
            max_seq: AtomicU64::new(0),
        }
    }

    /// Record a change (write lock). Callers apply seqs in ascending order.
    pub fn push(&self, key: RowKey, seq: u64, change: RowChange) {
        let added = key.approx_size() + change.approx_size() + 16;
        let mut data = self.data.write();
        data.entry(key).or_default().push((seq, change));
        drop(data);

        self.size.fetch_add(added, Ordering::Relaxed);
        self.change_count.fetch_add(1, Ordering::Relaxed);
        self.min_seq.fetch_min(seq, Ordering::Relaxed);
        self.max_seq.fetch_max(seq, Ordering::Relaxed);
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.data.read().contains_key(key)
    }

    /// Copy of a key's history (read lock)
    pub fn get(&self, key: &RowKey) -> Option<ChangeList> {
        self.data.read().get(key).cloned()
    }

    /// Up to `limit` entries with keys strictly after `after` (or from the
    /// start when `None`), in key order
    pub fn range_after(&self, after: Option<&RowKey>, limit: usize) -> Vec<(RowKey, ChangeList)> {
        let data = self.data.read();
        let lower = match after {
            Some(k) => Bound::Excluded(k),
            None => Bound::Unbounded,
        };
        data.range::<RowKey, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of every entry in key order (for flush)
    pub fn entries(&self) -> Vec<(RowKey, ChangeList)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn key_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn change_count(&self) -> usize {
        self.change_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Lowest seq recorded, or None if empty
    pub fn min_seq(&self) -> Option<u64> {
        match self.min_seq.load(Ordering::Relaxed) {
            u64::MAX => None,
            seq => Some(seq),
        }
    }

    /// Highest seq recorded (0 if empty)
    pub fn max_seq(&self) -> u64 {
        self.max_seq.load(Ordering::Relaxed)
    }
}

impl Default for ChangeMap {
    fn default() -> Self {
        Self::new()
    }
}
