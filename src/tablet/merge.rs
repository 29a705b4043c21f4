//! K-way merge over row sources
//!
//! Base files, delta units and in-memory stores are each sorted by key.
//! `MergingIterator` walks them together and yields one `RowHistory` per
//! distinct key, in key order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::error::Result;
use crate::memstore::{ChangeList, ChangeMap, DeltaMemStore, MemStore};
use crate::schema::RowKey;
use crate::storage::{BaseRecord, SortedFileIterator};

use super::fold::RowHistory;

/// What a source knows about a key
pub enum SourceEntry {
    Base(BaseRecord),
    Changes(ChangeList),
}

/// A key-ordered stream of entries
pub type RowSource = Box<dyn Iterator<Item = Result<(RowKey, SourceEntry)>> + Send>;

/// Wrap a base file iterator as a row source
pub fn base_source(iter: SortedFileIterator<BaseRecord>) -> RowSource {
    Box::new(iter.map(|r| r.map(|(k, rec)| (k, SourceEntry::Base(rec)))))
}

/// Wrap a delta unit iterator as a row source
pub fn delta_source(iter: SortedFileIterator<ChangeList>) -> RowSource {
    Box::new(iter.map(|r| r.map(|(k, changes)| (k, SourceEntry::Changes(changes)))))
}

/// In-memory store owning a change map
#[derive(Clone)]
pub enum MapOwner {
    MemStore(Arc<MemStore>),
    Delta(Arc<DeltaMemStore>),
}

impl MapOwner {
    fn map(&self) -> &ChangeMap {
        match self {
            MapOwner::MemStore(m) => m.changes(),
            MapOwner::Delta(d) => d.changes(),
        }
    }
}

/// Pages through a change map without holding its lock between pages
pub struct MapCursor {
    owner: MapOwner,
    buffer: std::vec::IntoIter<(RowKey, ChangeList)>,
    last_key: Option<RowKey>,
    exhausted: bool,
}

const MAP_PAGE: usize = 256;

impl MapCursor {
    pub fn new(owner: MapOwner) -> Self {
        Self {
            owner,
            buffer: Vec::new().into_iter(),
            last_key: None,
            exhausted: false,
        }
    }

    pub fn into_source(self) -> RowSource {
        Box::new(self.map(|(k, changes)| Ok((k, SourceEntry::Changes(changes)))))
    }
}

impl Iterator for MapCursor {
    type Item = (RowKey, ChangeList);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, changes)) = self.buffer.next() {
                self.last_key = Some(key.clone());
                return Some((key, changes));
            }
            if self.exhausted {
                return None;
            }
            let page = self.owner.map().range_after(self.last_key.as_ref(), MAP_PAGE);
            if page.len() < MAP_PAGE {
                self.exhausted = true;
            }
            if page.is_empty() {
                return None;
            }
            self.buffer = page.into_iter();
        }
    }
}

/// Merges sorted sources into per-key histories
pub struct MergingIterator {
    sources: Vec<RowSource>,
    heads: Vec<Option<SourceEntry>>,
    heap: BinaryHeap<Reverse<(RowKey, usize)>>,
    failed: bool,
}

impl MergingIterator {
    pub fn new(mut sources: Vec<RowSource>) -> Result<Self> {
        let mut heads = Vec::with_capacity(sources.len());
        let mut heap = BinaryHeap::new();
        for (idx, source) in sources.iter_mut().enumerate() {
            match source.next().transpose()? {
                Some((key, entry)) => {
                    heap.push(Reverse((key, idx)));
                    heads.push(Some(entry));
                }
                None => heads.push(None),
            }
        }
        Ok(Self {
            sources,
            heads,
            heap,
            failed: false,
        })
    }

    fn advance(&mut self, idx: usize) -> Result<()> {
        match self.sources[idx].next().transpose()? {
            Some((key, entry)) => {
                self.heads[idx] = Some(entry);
                self.heap.push(Reverse((key, idx)));
            }
            None => self.heads[idx] = None,
        }
        Ok(())
    }

    fn next_history(&mut self) -> Result<Option<(RowKey, RowHistory)>> {
        let Some(Reverse((key, idx))) = self.heap.pop() else {
            return Ok(None);
        };

        let mut history = RowHistory::new();
        let take = |entry: Option<SourceEntry>, history: &mut RowHistory| match entry {
            Some(SourceEntry::Base(rec)) => history.base = Some(rec),
            Some(SourceEntry::Changes(changes)) => history.extend(changes),
            None => {}
        };

        take(self.heads[idx].take(), &mut history);
        self.advance(idx)?;

        while let Some(Reverse((next_key, _))) = self.heap.peek() {
            if *next_key != key {
                break;
            }
            if let Some(Reverse((_, other))) = self.heap.pop() {
                take(self.heads[other].take(), &mut history);
                self.advance(other)?;
            }
        }

        Ok(Some((key, history)))
    }
}

impl Iterator for MergingIterator {
    type Item = Result<(RowKey, RowHistory)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_history() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
