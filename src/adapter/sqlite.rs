//! SQLite execution adapter.
//!
//! Also the only adapter exercised end-to-end in unit tests, since it needs
//! no server.

use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::config::ConnectionSettings;
use crate::schema::scoring::score_candidates;
use crate::schema::{
    ColumnMetadata, Relationship, SchemaMetadata, SchemaProfile, SourceInfo, TableMetadata,
};
use crate::sql::{Engine, SqlDialect};

use super::{ensure_row_limit, guarded_select, AdapterError, DatabaseAdapter, Row};

pub struct SqliteAdapter {
    path: PathBuf,
}

impl SqliteAdapter {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            path: settings.sqlite_path()?,
        })
    }

    fn connect(&self) -> Result<Connection, AdapterError> {
        if !self.path.exists() {
            return Err(AdapterError::MissingDatabase(self.path.clone()));
        }
        Ok(Connection::open(&self.path)?)
    }
}

/// Map a declared SQLite column type onto the generic vocabulary. SQLite
/// types are affinities, so substring matching is the right model.
fn sqlite_type_to_generic(declared: &str) -> &'static str {
    let lowered = declared.to_lowercase();
    if lowered.contains("int") {
        return "integer";
    }
    if ["real", "floa", "doub", "dec", "num"]
        .iter()
        .any(|tok| lowered.contains(tok))
    {
        return "numeric";
    }
    if lowered.contains("date") || lowered.contains("time") {
        return "timestamp without time zone";
    }
    "text"
}

fn sqlite_value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::from(v),
        ValueRef::Real(v) => Value::from(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn quote_table(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl DatabaseAdapter for SqliteAdapter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn execute_select(
        &self,
        sql: &str,
        row_limit: u32,
        timeout_ms: u64,
    ) -> Result<Vec<Row>, AdapterError> {
        ensure_row_limit(row_limit)?;
        let conn = self.connect()?;
        conn.pragma_update(None, "busy_timeout", timeout_ms as i64)?;

        let wrapped = guarded_select(sql, Engine::Sqlite.limit_placeholder());
        debug!(engine = "sqlite", row_limit, "executing guarded query");

        let mut stmt = conn.prepare(&wrapped)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        let mut result = stmt.query([row_limit])?;
        while let Some(row) = result.next()? {
            let mut out = Row::new();
            for (idx, name) in column_names.iter().enumerate() {
                out.insert(name.clone(), sqlite_value_to_json(row.get_ref(idx)?));
            }
            rows.push(out);
        }
        Ok(rows)
    }

    fn introspect_schema(
        &self,
        schema_name: Option<&str>,
    ) -> Result<SchemaMetadata, AdapterError> {
        let conn = self.connect()?;

        let mut stmt = conn.prepare(
            "SELECT name
             FROM sqlite_master
             WHERE type = 'table'
               AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut tables = Vec::with_capacity(table_names.len());
        let mut relationships = Vec::new();

        for table_name in &table_names {
            let quoted = quote_table(table_name);

            let mut info = conn.prepare(&format!("PRAGMA table_info({quoted})"))?;
            let columns: Vec<ColumnMetadata> = info
                .query_map([], |row| {
                    let cid: i64 = row.get(0)?;
                    let name: String = row.get(1)?;
                    let declared: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
                    let notnull: i64 = row.get(3)?;
                    let pk: i64 = row.get(5)?;
                    Ok(ColumnMetadata {
                        column_name: name,
                        data_type: sqlite_type_to_generic(&declared).to_string(),
                        udt_name: declared,
                        is_nullable: notnull == 0,
                        is_primary_key: pk == 1,
                        ordinal_position: cid as u32 + 1,
                    })
                })?
                .collect::<Result<_, _>>()?;

            let row_count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {quoted}"), [], |row| {
                    row.get(0)
                })?;

            let mut fk = conn.prepare(&format!("PRAGMA foreign_key_list({quoted})"))?;
            let fks: Vec<(String, String, String)> = fk
                .query_map([], |row| {
                    Ok((row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<_, _>>()?;
            for (to_table, from_column, to_column) in fks {
                relationships.push(Relationship {
                    from_table: table_name.clone(),
                    from_column,
                    to_table,
                    to_column,
                });
            }

            tables.push(TableMetadata {
                table_name: table_name.clone(),
                row_count,
                columns,
            });
        }

        let candidates = score_candidates(&tables, &HashMap::new());
        debug!(
            engine = "sqlite",
            tables = tables.len(),
            relationships = relationships.len(),
            "introspected schema"
        );

        Ok(SchemaMetadata {
            source: SourceInfo {
                db_engine: "sqlite".to_string(),
                schema_name: schema_name.unwrap_or("main").to_string(),
            },
            profile: SchemaProfile {
                table_count: tables.len(),
                relationship_count: relationships.len(),
            },
            tables,
            entities: candidates.entities,
            measures: candidates.measures,
            time_columns: candidates.time_columns,
            relationships,
        })
    }
}
