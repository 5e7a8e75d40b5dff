//! MySQL execution adapter.

use std::collections::HashMap;

use ::mysql::prelude::Queryable;
use ::mysql::{Conn, OptsBuilder, Value as MySqlValue};
use serde_json::Value;
use tracing::debug;

use crate::config::{ConnectionSettings, ServerParams};
use crate::schema::scoring::score_candidates;
use crate::schema::{
    ColumnMetadata, Relationship, SchemaMetadata, SchemaProfile, SourceInfo, TableMetadata,
};
use crate::sql::{Engine, SqlDialect};

use super::{ensure_row_limit, guarded_select, AdapterError, DatabaseAdapter, Row};

pub struct MySqlAdapter {
    params: ServerParams,
}

impl MySqlAdapter {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            params: settings.mysql_params()?,
        })
    }

    fn connect(&self) -> Result<Conn, AdapterError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(self.params.host.clone()))
            .tcp_port(self.params.port)
            .db_name(Some(self.params.dbname.clone()))
            .user(Some(self.params.user.clone()))
            .pass(Some(self.params.password.clone()));
        Ok(Conn::new(opts)?)
    }
}

/// Map a MySQL information_schema type name onto the generic vocabulary the
/// scoring pass understands. The raw name is kept as `udt_name`.
fn mysql_type_to_generic(data_type: &str) -> &'static str {
    match data_type.to_lowercase().as_str() {
        "bigint" => "bigint",
        "int" | "integer" | "smallint" | "tinyint" | "mediumint" => "integer",
        "decimal" | "numeric" | "float" | "double" => "numeric",
        "date" => "date",
        "datetime" | "timestamp" => "timestamp without time zone",
        "time" => "time without time zone",
        _ => "text",
    }
}

fn mysql_value_to_json(value: &MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        MySqlValue::Int(v) => Value::from(*v),
        MySqlValue::UInt(v) => Value::from(*v),
        MySqlValue::Float(v) => Value::from(f64::from(*v)),
        MySqlValue::Double(v) => Value::from(*v),
        MySqlValue::Date(y, m, d, hh, mm, ss, _) => {
            if *hh == 0 && *mm == 0 && *ss == 0 {
                Value::String(format!("{y:04}-{m:02}-{d:02}"))
            } else {
                Value::String(format!("{y:04}-{m:02}-{d:02} {hh:02}:{mm:02}:{ss:02}"))
            }
        }
        MySqlValue::Time(neg, days, hh, mm, ss, _) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u32::from(*hh) + days * 24;
            Value::String(format!("{sign}{hours:02}:{mm:02}:{ss:02}"))
        }
    }
}

impl DatabaseAdapter for MySqlAdapter {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn execute_select(
        &self,
        sql: &str,
        row_limit: u32,
        timeout_ms: u64,
    ) -> Result<Vec<Row>, AdapterError> {
        ensure_row_limit(row_limit)?;
        let mut conn = self.connect()?;
        conn.query_drop(format!("SET SESSION MAX_EXECUTION_TIME={timeout_ms}"))?;

        let wrapped = guarded_select(sql, Engine::MySql.limit_placeholder());
        debug!(engine = "mysql", row_limit, "executing guarded query");

        let raw_rows: Vec<::mysql::Row> = conn.exec(wrapped, (row_limit,))?;
        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            let mut out = Row::new();
            for (idx, column) in raw.columns_ref().iter().enumerate() {
                let value = raw
                    .as_ref(idx)
                    .map(mysql_value_to_json)
                    .unwrap_or(Value::Null);
                out.insert(column.name_str().into_owned(), value);
            }
            rows.push(out);
        }
        Ok(rows)
    }

    fn introspect_schema(
        &self,
        schema_name: Option<&str>,
    ) -> Result<SchemaMetadata, AdapterError> {
        let target_schema = schema_name.unwrap_or(&self.params.dbname).to_string();
        let mut conn = self.connect()?;

        let table_names: Vec<String> = conn.exec(
            "SELECT table_name
             FROM information_schema.tables
             WHERE table_schema = ?
               AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            (&target_schema,),
        )?;

        let column_rows: Vec<(String, String, String, String, i64, String)> = conn.exec(
            "SELECT table_name, column_name, data_type, is_nullable, ordinal_position, column_key
             FROM information_schema.columns
             WHERE table_schema = ?
             ORDER BY table_name, ordinal_position",
            (&target_schema,),
        )?;

        let fk_rows: Vec<(String, String, String, String)> = conn.exec(
            "SELECT table_name, column_name, referenced_table_name, referenced_column_name
             FROM information_schema.key_column_usage
             WHERE table_schema = ?
               AND referenced_table_name IS NOT NULL",
            (&target_schema,),
        )?;

        let count_rows: Vec<(String, Option<i64>)> = conn.exec(
            "SELECT table_name, table_rows
             FROM information_schema.tables
             WHERE table_schema = ?",
            (&target_schema,),
        )?;

        let row_counts: HashMap<String, i64> = count_rows
            .into_iter()
            .map(|(table, rows)| (table, rows.unwrap_or(0)))
            .collect();

        let mut columns_by_table: HashMap<String, Vec<ColumnMetadata>> = HashMap::new();
        for (table, column_name, data_type, is_nullable, ordinal, column_key) in column_rows {
            columns_by_table
                .entry(table)
                .or_default()
                .push(ColumnMetadata {
                    column_name,
                    data_type: mysql_type_to_generic(&data_type).to_string(),
                    udt_name: data_type,
                    is_nullable: is_nullable.eq_ignore_ascii_case("yes"),
                    is_primary_key: column_key == "PRI",
                    ordinal_position: ordinal as u32,
                });
        }

        let relationships: Vec<Relationship> = fk_rows
            .into_iter()
            .map(|(from_table, from_column, to_table, to_column)| Relationship {
                from_table,
                from_column,
                to_table,
                to_column,
            })
            .collect();

        let tables: Vec<TableMetadata> = table_names
            .iter()
            .map(|name| TableMetadata {
                table_name: name.clone(),
                row_count: row_counts.get(name).copied().unwrap_or(0),
                columns: columns_by_table.remove(name).unwrap_or_default(),
            })
            .collect();

        // No per-column distinct estimates here; cardinality lands on the
        // scoring pass's neutral default.
        let candidates = score_candidates(&tables, &HashMap::new());
        debug!(
            engine = "mysql",
            schema = target_schema.as_str(),
            tables = tables.len(),
            "introspected schema"
        );

        Ok(SchemaMetadata {
            source: SourceInfo {
                db_engine: "mysql".to_string(),
                schema_name: target_schema,
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
