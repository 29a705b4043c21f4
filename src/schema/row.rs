//! Row containers
//!
//! `PartialRow` is what a caller fills in for a mutation (only some cells
//! set). `Row` is a complete row returned by a scan.

use std::sync::Arc;

use super::{RowKey, Schema, Value};
use crate::error::Result;
use crate::TabletError;

/// A row with some cells set; unset cells are `None`
#[derive(Debug, Clone)]
pub struct PartialRow {
    schema: Arc<Schema>,
    cells: Vec<Option<Value>>,
}

impl PartialRow {
    pub fn new(schema: Arc<Schema>) -> Self {
        let cells = vec![None; schema.num_columns()];
        Self { schema, cells }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Set a cell by column name, checking type and nullability
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let idx = self.schema.find_column(column).ok_or_else(|| {
            TabletError::SchemaMismatch(format!("unknown column '{}'", column))
        })?;
        self.set_idx(idx, value.into())
    }

    /// Set a cell by column index
    pub fn set_idx(&mut self, idx: usize, value: Value) -> Result<&mut Self> {
        self.schema.check_value(idx, &value)?;
        self.cells[idx] = Some(value);
        Ok(self)
    }

    pub fn set_int64(&mut self, column: &str, value: i64) -> Result<&mut Self> {
        self.set(column, Value::Int64(value))
    }

    pub fn set_int32(&mut self, column: &str, value: i32) -> Result<&mut Self> {
        self.set(column, Value::Int32(value))
    }

    pub fn set_bool(&mut self, column: &str, value: bool) -> Result<&mut Self> {
        self.set(column, Value::Bool(value))
    }

    pub fn set_string(&mut self, column: &str, value: impl Into<String>) -> Result<&mut Self> {
        self.set(column, Value::String(value.into()))
    }

    pub fn set_binary(&mut self, column: &str, value: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.set(column, Value::Binary(value.into()))
    }

    /// Explicitly store NULL (distinct from leaving the cell unset)
    pub fn set_null(&mut self, column: &str) -> Result<&mut Self> {
        self.set(column, Value::Null)
    }

    pub fn is_set(&self, idx: usize) -> bool {
        self.cells.get(idx).map(Option::is_some).unwrap_or(false)
    }

    pub fn cell(&self, idx: usize) -> Option<&Value> {
        self.cells.get(idx).and_then(Option::as_ref)
    }

    pub fn cells(&self) -> &[Option<Value>] {
        &self.cells
    }

    /// The primary key, or `InvalidPrimaryKey` if any key cell is unset/null
    pub fn key(&self) -> Result<RowKey> {
        let mut values = Vec::with_capacity(self.schema.num_key_columns());
        for idx in 0..self.schema.num_key_columns() {
            match self.cells[idx].as_ref() {
                Some(v) if !v.is_null() => values.push(v.clone()),
                _ => {
                    return Err(TabletError::InvalidPrimaryKey(format!(
                        "key column '{}' is not set",
                        self.schema.columns()[idx].name
                    )))
                }
            }
        }
        Ok(RowKey(values))
    }

    /// Approximate buffered size
    pub fn approx_size(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.as_ref().map(Value::approx_size).unwrap_or(0) + 1)
            .sum()
    }
}

/// A complete row as returned by a scanner
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Self {
        Self { schema, values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn key(&self) -> RowKey {
        self.schema.key_of(&self.values)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.schema
            .find_column(column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_int64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_int64)
    }

    pub fn get_string(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }
}
