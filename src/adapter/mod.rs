//! Database execution adapters.
//!
//! One [`DatabaseAdapter`] per engine, selected by the configuration-driven
//! [`factory`]. Adapters differ only in connection/driver mechanics and in
//! how a server-side timeout is requested; every dialect difference in
//! generated SQL lives in [`crate::sql::dialect`].
//!
//! Adapters open one connection per call and close it on drop. Validated SQL
//! is never executed bare: it is wrapped in a guarded subquery that enforces
//! the row limit server-side.

pub mod factory;
mod mysql;
mod postgres;
mod sqlite;

pub use self::mysql::MySqlAdapter;
pub use self::postgres::PostgresAdapter;
pub use self::sqlite::SqliteAdapter;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::config::SettingsError;
use crate::schema::SchemaMetadata;
use crate::sql::Engine;

/// One result row: column name to JSON value, deterministically ordered.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("row_limit must be positive")]
    InvalidRowLimit,

    #[error("SQLite database file does not exist: {0}")]
    MissingDatabase(PathBuf),

    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),

    #[error("mysql error: {0}")]
    MySql(#[from] ::mysql::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Execution and introspection surface of one database engine.
pub trait DatabaseAdapter {
    /// The engine this adapter drives.
    fn engine(&self) -> Engine;

    /// Execute already-validated read-only SQL inside a guarded subquery,
    /// with a server-side timeout and a hard row limit.
    fn execute_select(
        &self,
        sql: &str,
        row_limit: u32,
        timeout_ms: u64,
    ) -> Result<Vec<Row>, AdapterError>;

    /// Introspect the target schema into a [`SchemaMetadata`] snapshot,
    /// including the shared candidate scoring pass.
    fn introspect_schema(&self, schema_name: Option<&str>) -> Result<SchemaMetadata, AdapterError>;
}

pub(crate) fn ensure_row_limit(row_limit: u32) -> Result<(), AdapterError> {
    if row_limit == 0 {
        return Err(AdapterError::InvalidRowLimit);
    }
    Ok(())
}

/// Wrap validated SQL so the engine enforces the row limit, with the
/// engine's positional placeholder for the bound limit value.
pub(crate) fn guarded_select(sql: &str, placeholder: &str) -> String {
    format!("SELECT * FROM ({sql}) AS guarded_query LIMIT {placeholder}")
}
