//! Table schema and builder

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{DataType, RowKey, Value};
use crate::error::Result;
use crate::TabletError;

/// A single column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub is_key: bool,
}

/// Ordered column list; the first `num_key_columns` form the primary key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    num_key_columns: usize,
    #[serde(skip)]
    name_index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema from columns, validating key placement and names
    pub fn new(columns: Vec<ColumnSchema>) -> Result<Self> {
        let num_key_columns = columns.iter().take_while(|c| c.is_key).count();
        if num_key_columns == 0 {
            return Err(TabletError::SchemaMismatch(
                "schema must have at least one key column".to_string(),
            ));
        }
        if columns[num_key_columns..].iter().any(|c| c.is_key) {
            return Err(TabletError::SchemaMismatch(
                "key columns must precede all other columns".to_string(),
            ));
        }
        if let Some(col) = columns[..num_key_columns].iter().find(|c| c.nullable) {
            return Err(TabletError::SchemaMismatch(format!(
                "key column '{}' cannot be nullable",
                col.name
            )));
        }

        let mut schema = Self {
            columns,
            num_key_columns,
            name_index: HashMap::new(),
        };
        schema.rebuild_index()?;
        Ok(schema)
    }

    /// Restore the name index after deserialization
    pub(crate) fn rebuild_index(&mut self) -> Result<()> {
        self.name_index.clear();
        for (idx, col) in self.columns.iter().enumerate() {
            if self.name_index.insert(col.name.clone(), idx).is_some() {
                return Err(TabletError::SchemaMismatch(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }
        Ok(())
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnSchema> {
        self.columns.get(idx)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    /// Index of a column by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        if self.name_index.is_empty() {
            return self.columns.iter().position(|c| c.name == name);
        }
        self.name_index.get(name).copied()
    }

    /// Check that `value` may be stored in column `idx`
    pub fn check_value(&self, idx: usize, value: &Value) -> Result<()> {
        let col = self.columns.get(idx).ok_or_else(|| {
            TabletError::SchemaMismatch(format!("column index {} out of range", idx))
        })?;
        match value.data_type() {
            None if col.nullable => Ok(()),
            None => Err(TabletError::SchemaMismatch(format!(
                "column '{}' is not nullable",
                col.name
            ))),
            Some(t) if t == col.data_type => Ok(()),
            Some(t) => Err(TabletError::SchemaMismatch(format!(
                "column '{}' expects {}, got {}",
                col.name, col.data_type, t
            ))),
        }
    }

    /// Extract the key of a full row
    pub fn key_of(&self, values: &[Value]) -> RowKey {
        RowKey(values[..self.num_key_columns.min(values.len())].to_vec())
    }
}

/// Fluent schema builder
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<ColumnSchema>,
}

impl SchemaBuilder {
    /// Add a non-nullable primary key column
    pub fn key_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnSchema {
            name: name.into(),
            data_type,
            nullable: false,
            is_key: true,
        });
        self
    }

    /// Add a value column
    pub fn column(mut self, name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        self.columns.push(ColumnSchema {
            name: name.into(),
            data_type,
            nullable,
            is_key: false,
        });
        self
    }

    pub fn build(self) -> Result<Schema> {
        Schema::new(self.columns)
    }
}
