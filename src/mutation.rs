//! Mutations
//!
//! Three representations of a write:
//! - `Mutation`: client-side, built on a `PartialRow`, owned by a session
//! - `RowOperation`: wire form (key + set non-key cells by index)
//! - `RowChange`: server-side change recorded against a key with a sequence
//!   number in the MemStore, delta store and WAL

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::{PartialRow, RowKey, Schema, Value};
use crate::TabletError;

/// Kind of write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

/// A client-side mutation against one table
#[derive(Debug, Clone)]
pub struct Mutation {
    kind: MutationKind,
    table: String,
    row: PartialRow,
}

impl Mutation {
    pub fn new(kind: MutationKind, table: impl Into<String>, row: PartialRow) -> Self {
        Self {
            kind,
            table: table.into(),
            row,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn row(&self) -> &PartialRow {
        &self.row
    }

    pub fn mutable_row(&mut self) -> &mut PartialRow {
        &mut self.row
    }

    /// Validate against the row's schema and produce the wire form
    pub fn to_operation(&self) -> Result<RowOperation> {
        let key = self.row.key()?;
        let schema = self.row.schema();
        let columns = self
            .row
            .cells()
            .iter()
            .enumerate()
            .skip(schema.num_key_columns())
            .filter_map(|(idx, cell)| cell.as_ref().map(|v| (idx as u32, v.clone())))
            .collect();
        let op = RowOperation {
            kind: self.kind,
            key,
            columns,
        };
        op.validate(schema)?;
        Ok(op)
    }

    pub fn approx_size(&self) -> usize {
        self.row.approx_size() + self.table.len()
    }
}

/// Wire form of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOperation {
    pub kind: MutationKind,
    pub key: RowKey,
    /// Non-key cells that were set, by column index
    pub columns: Vec<(u32, Value)>,
}

impl RowOperation {
    pub fn insert(key: RowKey, columns: Vec<(u32, Value)>) -> Self {
        Self {
            kind: MutationKind::Insert,
            key,
            columns,
        }
    }

    pub fn update(key: RowKey, columns: Vec<(u32, Value)>) -> Self {
        Self {
            kind: MutationKind::Update,
            key,
            columns,
        }
    }

    pub fn delete(key: RowKey) -> Self {
        Self {
            kind: MutationKind::Delete,
            key,
            columns: Vec::new(),
        }
    }

    /// Check key and cells against `schema`
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let nkeys = schema.num_key_columns();
        if self.key.0.len() != nkeys {
            return Err(TabletError::InvalidPrimaryKey(format!(
                "expected {} key values, got {}",
                nkeys,
                self.key.0.len()
            )));
        }
        for (idx, value) in self.key.0.iter().enumerate() {
            if value.is_null() {
                return Err(TabletError::InvalidPrimaryKey(format!(
                    "key column '{}' is null",
                    schema.columns()[idx].name
                )));
            }
            schema.check_value(idx, value).map_err(|e| match e {
                TabletError::SchemaMismatch(m) => TabletError::InvalidPrimaryKey(m),
                other => other,
            })?;
        }

        for (idx, value) in &self.columns {
            let idx = *idx as usize;
            if idx < nkeys {
                return Err(TabletError::SchemaMismatch(format!(
                    "key column '{}' cannot be set as a value",
                    schema.columns()[idx].name
                )));
            }
            schema.check_value(idx, value)?;
        }

        match self.kind {
            MutationKind::Insert => {
                for (idx, col) in schema.columns().iter().enumerate().skip(nkeys) {
                    let set = self.columns.iter().any(|(i, _)| *i as usize == idx);
                    if !set && !col.nullable {
                        return Err(TabletError::SchemaMismatch(format!(
                            "insert is missing non-nullable column '{}'",
                            col.name
                        )));
                    }
                }
            }
            MutationKind::Update => {
                if self.columns.is_empty() {
                    return Err(TabletError::SchemaMismatch(
                        "update sets no non-key columns".to_string(),
                    ));
                }
            }
            MutationKind::Delete => {
                if !self.columns.is_empty() {
                    return Err(TabletError::SchemaMismatch(
                        "delete may only carry key columns".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Convert a validated operation into the change recorded server-side
    pub fn to_change(&self, schema: &Schema) -> RowChange {
        match self.kind {
            MutationKind::Insert => {
                let mut values = vec![Value::Null; schema.num_columns()];
                for (idx, v) in self.key.0.iter().enumerate() {
                    values[idx] = v.clone();
                }
                for (idx, v) in &self.columns {
                    values[*idx as usize] = v.clone();
                }
                RowChange::Insert(values)
            }
            MutationKind::Update => RowChange::Update(self.columns.clone()),
            MutationKind::Delete => RowChange::Delete,
        }
    }

    pub fn approx_size(&self) -> usize {
        self.key.approx_size() + self.columns.iter().map(|(_, v)| v.approx_size() + 4).sum::<usize>()
    }
}

/// A change applied to one row at one sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowChange {
    /// Full row image; makes the row live (insert or re-insert)
    Insert(Vec<Value>),
    /// Overwrite the listed columns of a live row
    Update(Vec<(u32, Value)>),
    /// Mark the row dead
    Delete,
}

impl RowChange {
    pub fn approx_size(&self) -> usize {
        match self {
            RowChange::Insert(values) => values.iter().map(Value::approx_size).sum(),
            RowChange::Update(cols) => cols.iter().map(|(_, v)| v.approx_size() + 4).sum(),
            RowChange::Delete => 1,
        }
    }
}
