//! Row folding
//!
//! A row's visible state is its base record followed by every later change
//! in ascending sequence order:
//! - `Insert` makes the row live with the given full image
//! - `Update` overwrites the named columns of a live row
//! - `Delete` makes the row dead
//!
//! Updates from different sequence numbers touching different columns all
//! survive; for the same column the highest sequence number wins.

use crate::mutation::RowChange;
use crate::schema::Value;
use crate::storage::BaseRecord;

/// Everything known about one key, gathered from all sources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowHistory {
    pub base: Option<BaseRecord>,
    pub changes: Vec<(u64, RowChange)>,
}

impl RowHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: BaseRecord) -> Self {
        Self {
            base: Some(base),
            changes: Vec::new(),
        }
    }

    pub fn extend(&mut self, changes: impl IntoIterator<Item = (u64, RowChange)>) {
        self.changes.extend(changes);
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.changes.is_empty()
    }

    /// Highest sequence number contributing to this history
    pub fn last_seq(&self) -> u64 {
        let base = self.base.as_ref().map(|b| b.as_of_seq).unwrap_or(0);
        self.changes.iter().map(|(s, _)| *s).fold(base, u64::max)
    }

    /// Whether any change is visible at `snapshot_seq`
    pub fn visible_at(&self, snapshot_seq: u64) -> bool {
        self.base.is_some() || self.changes.iter().any(|(s, _)| *s <= snapshot_seq)
    }

    /// Row values visible at `snapshot_seq`, or `None` if absent or dead
    pub fn fold(&self, snapshot_seq: u64) -> Option<Vec<Value>> {
        let base_seq = self.base.as_ref().map(|b| b.as_of_seq).unwrap_or(0);
        let mut row = self.base.as_ref().map(|b| b.values.clone());

        let mut changes: Vec<&(u64, RowChange)> = self
            .changes
            .iter()
            .filter(|(seq, _)| *seq > base_seq && *seq <= snapshot_seq)
            .collect();
        changes.sort_by_key(|(seq, _)| *seq);

        for (_, change) in changes {
            apply_change(&mut row, change);
        }
        row
    }
}

/// Apply one change to a row state in place
pub fn apply_change(row: &mut Option<Vec<Value>>, change: &RowChange) {
    match change {
        RowChange::Insert(values) => *row = Some(values.clone()),
        RowChange::Update(columns) => {
            if let Some(values) = row.as_mut() {
                for (idx, value) in columns {
                    if let Some(slot) = values.get_mut(*idx as usize) {
                        *slot = value.clone();
                    }
                }
            }
        }
        RowChange::Delete => *row = None,
    }
}
