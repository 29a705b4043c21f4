//! Schema Module
//!
//! Table schemas, typed cell values and row containers.
//!
//! ## Rules
//! - Key columns come first and are never nullable
//! - Rows are ordered by their key columns (`RowKey`)
//! - Only type and nullability are validated; richer DDL checks live elsewhere

mod row;
mod table_schema;
mod value;

pub use row::{PartialRow, Row};
pub use table_schema::{ColumnSchema, Schema, SchemaBuilder};
pub use value::{DataType, RowKey, Value};
