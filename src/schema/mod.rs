//! Schema metadata model.
//!
//! A [`SchemaMetadata`] is an immutable snapshot of what introspection found
//! in a target database: tables with columns, foreign-key relationships, and
//! three heuristic candidate lists (entities, measures, time columns) that the
//! SQL builder draws from. It is produced once per dataset refresh and
//! replaced wholesale; consumers identify a given snapshot by its content
//! hash.

pub mod scoring;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::store::hash::compute_hash;

/// Where a metadata snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub db_engine: String,
    pub schema_name: String,
}

/// Summary counts for quick display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaProfile {
    pub table_count: usize,
    pub relationship_count: usize,
}

/// One column as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_name: String,
    /// Generic type vocabulary (e.g. `integer`, `text`, `numeric`, `date`).
    pub data_type: String,
    /// Engine-native type name, kept for diagnostics.
    pub udt_name: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub ordinal_position: u32,
}

/// One table with its columns and an estimated row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_name: String,
    pub row_count: i64,
    pub columns: Vec<ColumnMetadata>,
}

/// A foreign-key-like relationship between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// A column ranked as a grouping dimension (country, customer, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub row_count: i64,
    pub cardinality_ratio: f64,
    pub score: f64,
}

/// A numeric column ranked as an aggregatable measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureCandidate {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub row_count: i64,
    pub cardinality_ratio: f64,
    pub score: f64,
    pub default_agg: String,
}

/// A date/time column ranked as a trend axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeColumnCandidate {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub score: f64,
    pub default_grain: String,
}

/// Full introspection snapshot for one dataset.
///
/// Candidate lists are sorted descending by score (stable, so ties keep
/// introspection order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub source: SourceInfo,
    pub profile: SchemaProfile,
    pub tables: Vec<TableMetadata>,
    pub entities: Vec<EntityCandidate>,
    pub measures: Vec<MeasureCandidate>,
    pub time_columns: Vec<TimeColumnCandidate>,
    pub relationships: Vec<Relationship>,
}

impl SchemaMetadata {
    /// Content hash identifying this snapshot, used for cache invalidation.
    pub fn schema_hash(&self) -> Result<String, serde_json::Error> {
        compute_hash(self)
    }

    /// Names of every known table.
    pub fn table_names(&self) -> HashSet<&str> {
        self.tables.iter().map(|t| t.table_name.as_str()).collect()
    }

    /// Known columns per table, for allow-list resolution.
    pub fn columns_by_table(&self) -> HashMap<&str, HashSet<&str>> {
        self.tables
            .iter()
            .map(|t| {
                let cols = t.columns.iter().map(|c| c.column_name.as_str()).collect();
                (t.table_name.as_str(), cols)
            })
            .collect()
    }

    /// Look up a relationship connecting two tables, in either direction.
    ///
    /// Returns `(left_column, right_column)` oriented so that the first
    /// element belongs to `left_table`.
    pub fn find_relationship(&self, left_table: &str, right_table: &str) -> Option<(&str, &str)> {
        for rel in &self.relationships {
            if rel.from_table == left_table && rel.to_table == right_table {
                return Some((rel.from_column.as_str(), rel.to_column.as_str()));
            }
            if rel.from_table == right_table && rel.to_table == left_table {
                return Some((rel.to_column.as_str(), rel.from_column.as_str()));
            }
        }
        None
    }
}
