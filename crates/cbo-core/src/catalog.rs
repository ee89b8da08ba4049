//! # Metadata Interface
//!
//! The optimizer consumes table statistics from a [`Metadata`] provider. It never
//! collects statistics itself; the provider answers "what do we know about this
//! table, given this constraint" and the statistics calculator turns the answer
//! into a per-symbol estimate for the scan.
//!
//! ## Unknown tables
//!
//! A provider that knows nothing about a table returns [`TableStatistics::empty`]
//! (unknown row count, no columns). Missing statistics are never an error; they
//! flow through the estimates as NaN.
//!
//! [`InMemoryMetadata`] keys tables by `schema.table` and is populated
//! programmatically. It ignores the constraint.

use crate::expr::Expr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reference to a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Connector-side column name a table-scan symbol is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnHandle(pub String);

impl ColumnHandle {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnHandle(name.into())
    }
}

impl fmt::Display for ColumnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive min/max of a column on the double line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleRange {
    pub min: f64,
    pub max: f64,
}

/// Statistics of one stored column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub nulls_fraction: f64,
    pub distinct_values_count: f64,
    /// Total bytes of the non-null values.
    pub data_size: f64,
    pub range: Option<DoubleRange>,
}

impl ColumnStatistics {
    pub fn new(distinct_values_count: f64, nulls_fraction: f64) -> Self {
        Self {
            nulls_fraction,
            distinct_values_count,
            data_size: f64::NAN,
            range: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(DoubleRange { min, max });
        self
    }

    pub fn with_data_size(mut self, data_size: f64) -> Self {
        self.data_size = data_size;
        self
    }
}

/// Statistics of a stored table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: f64,
    pub column_statistics: HashMap<ColumnHandle, ColumnStatistics>,
}

impl TableStatistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            column_statistics: HashMap::new(),
        }
    }

    /// Nothing is known about the table.
    pub fn empty() -> Self {
        Self::new(f64::NAN)
    }

    pub fn with_column(mut self, column: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_statistics
            .insert(ColumnHandle::new(column), stats);
        self
    }
}

/// Source of table statistics.
pub trait Metadata: Send + Sync {
    /// Statistics of `table` restricted by `constraint`, when the provider can use it.
    fn get_table_statistics(&self, table: &TableRef, constraint: Option<&Expr>) -> TableStatistics;
}

/// In-memory metadata for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadata {
    /// Keyed by "schema.table".
    tables: HashMap<String, TableStatistics>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, stats: TableStatistics) {
        self.tables.insert(table.to_string(), stats);
    }
}

impl Metadata for InMemoryMetadata {
    fn get_table_statistics(&self, table: &TableRef, _constraint: Option<&Expr>) -> TableStatistics {
        self.tables
            .get(&table.to_string())
            .cloned()
            .unwrap_or_else(TableStatistics::empty)
    }
}
