//! MemStore and DeltaMemStore
//!
//! Both hold changes keyed by row with per-change sequence numbers. A
//! MemStore owns rows first written since the last flush; a DeltaMemStore
//! holds changes to rows that already live elsewhere (base files, frozen
//! MemStores, or older deltas).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::Result;
use crate::mutation::RowChange;
use crate::schema::RowKey;
use crate::TabletError;

use super::map::{ChangeList, ChangeMap};

/// MemStore lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemStoreState {
    /// Accepting writes
    Active,
    /// Frozen, being written to a base file, still readable
    Flushing,
    /// Contents are durable in a base file; kept only for pinned snapshots
    Retired,
}

impl MemStoreState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MemStoreState::Active,
            1 => MemStoreState::Flushing,
            _ => MemStoreState::Retired,
        }
    }
}

/// In-memory store for rows first written since the last flush
pub struct MemStore {
    id: u64,
    state: AtomicU8,
    map: ChangeMap,
}

impl MemStore {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(MemStoreState::Active as u8),
            map: ChangeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> MemStoreState {
        MemStoreState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record a change; only an Active MemStore accepts writes
    pub fn apply(&self, key: RowKey, seq: u64, change: RowChange) -> Result<()> {
        if self.state() != MemStoreState::Active {
            return Err(TabletError::Storage(format!(
                "memstore {} is {:?}, not accepting writes",
                self.id,
                self.state()
            )));
        }
        self.map.push(key, seq, change);
        Ok(())
    }

    /// Active → Flushing
    pub fn freeze(&self) -> bool {
        self.transition(MemStoreState::Active, MemStoreState::Flushing)
    }

    /// Flushing → Retired
    pub fn retire(&self) -> bool {
        self.transition(MemStoreState::Flushing, MemStoreState::Retired)
    }

    fn transition(&self, from: MemStoreState, to: MemStoreState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn changes(&self) -> &ChangeMap {
        &self.map
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn history(&self, key: &RowKey) -> Option<ChangeList> {
        self.map.get(key)
    }

    pub fn size(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("changes", &self.map.change_count())
            .finish()
    }
}

/// In-memory buffer of changes to already-stored rows
pub struct DeltaMemStore {
    id: u64,
    frozen: AtomicBool,
    map: ChangeMap,
}

impl DeltaMemStore {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            frozen: AtomicBool::new(false),
            map: ChangeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn apply(&self, key: RowKey, seq: u64, change: RowChange) -> Result<()> {
        if self.is_frozen() {
            return Err(TabletError::Storage(format!(
                "delta memstore {} is frozen",
                self.id
            )));
        }
        self.map.push(key, seq, change);
        Ok(())
    }

    pub fn freeze(&self) -> bool {
        !self.frozen.swap(true, Ordering::AcqRel)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn changes(&self) -> &ChangeMap {
        &self.map
    }

    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn history(&self, key: &RowKey) -> Option<ChangeList> {
        self.map.get(key)
    }

    pub fn size(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for DeltaMemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaMemStore")
            .field("id", &self.id)
            .field("frozen", &self.is_frozen())
            .field("changes", &self.map.change_count())
            .finish()
    }
}
