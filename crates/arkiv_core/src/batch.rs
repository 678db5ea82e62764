use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One result row: column name to value, in result-set order.
pub type Row = IndexMap<String, Value>;

/// Identifies a schema object across gateways, caches and destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// One page of rows streamed out of a source table.
///
/// Column order within a batch is stable and comes from the source result
/// set; destinations rely on it when rendering headers and insert columns.
#[derive(Debug, Clone)]
pub struct Batch {
    pub database: String,
    pub table: String,
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.database.clone(), self.table.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names of the batch, taken from the first row.
    pub fn columns(&self) -> Vec<&str> {
        self.rows
            .first()
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
