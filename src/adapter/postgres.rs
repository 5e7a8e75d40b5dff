//! PostgreSQL execution adapter.
//!
//! Query execution goes through the simple (text) protocol: the wire carries
//! every value as text, which sidesteps per-type decoding for arbitrary
//! drafted SQL. Scalars are re-inferred from the text form. The simple
//! protocol takes no bind parameters, so the row limit is inlined as an
//! integer literal after validation.

use std::collections::{HashMap, HashSet};

use ::postgres::{Client, Config, NoTls, SimpleQueryMessage};
use serde_json::Value;
use tracing::debug;

use crate::config::{ConnectionSettings, ServerParams};
use crate::schema::scoring::score_candidates;
use crate::schema::{
    ColumnMetadata, Relationship, SchemaMetadata, SchemaProfile, SourceInfo, TableMetadata,
};
use crate::sql::Engine;

use super::{ensure_row_limit, AdapterError, DatabaseAdapter, Row};

pub struct PostgresAdapter {
    params: ServerParams,
}

impl PostgresAdapter {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, AdapterError> {
        Ok(Self {
            params: settings.postgres_params()?,
        })
    }

    fn connect(&self) -> Result<Client, AdapterError> {
        let mut config = Config::new();
        config
            .host(&self.params.host)
            .port(self.params.port)
            .dbname(&self.params.dbname)
            .user(&self.params.user)
            .password(&self.params.password);
        Ok(config.connect(NoTls)?)
    }
}

/// Re-infer a JSON scalar from a simple-protocol text value.
///
/// Postgres renders booleans as `t`/`f`; integers and decimals parse
/// directly. Anything else stays a string.
fn parse_text_scalar(raw: &str) -> Value {
    match raw {
        "t" | "true" => return Value::Bool(true),
        "f" | "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::from(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        if v.is_finite() {
            return Value::from(v);
        }
    }
    Value::String(raw.to_string())
}

impl DatabaseAdapter for PostgresAdapter {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn execute_select(
        &self,
        sql: &str,
        row_limit: u32,
        timeout_ms: u64,
    ) -> Result<Vec<Row>, AdapterError> {
        ensure_row_limit(row_limit)?;
        let mut client = self.connect()?;
        client.batch_execute(&format!("SET statement_timeout = '{timeout_ms}ms'"))?;

        let wrapped = format!("SELECT * FROM ({sql}) AS guarded_query LIMIT {row_limit}");
        debug!(engine = "postgres", row_limit, "executing guarded query");

        let mut rows = Vec::new();
        for message in client.simple_query(&wrapped)? {
            if let SimpleQueryMessage::Row(row) = message {
                let mut out = Row::new();
                for (idx, column) in row.columns().iter().enumerate() {
                    let value = match row.get(idx) {
                        Some(raw) => parse_text_scalar(raw),
                        None => Value::Null,
                    };
                    out.insert(column.name().to_string(), value);
                }
                rows.push(out);
            }
        }
        Ok(rows)
    }

    fn introspect_schema(
        &self,
        schema_name: Option<&str>,
    ) -> Result<SchemaMetadata, AdapterError> {
        let target_schema = schema_name.unwrap_or("public");
        let mut client = self.connect()?;

        let table_names: Vec<String> = client
            .query(
                "SELECT table_name::text
                 FROM information_schema.tables
                 WHERE table_schema = $1
                   AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&target_schema],
            )?
            .iter()
            .map(|row| row.get(0))
            .collect();

        let column_rows = client.query(
            "SELECT
                 table_name::text,
                 column_name::text,
                 data_type::text,
                 udt_name::text,
                 (is_nullable = 'YES') AS nullable,
                 ordinal_position::int
             FROM information_schema.columns
             WHERE table_schema = $1
             ORDER BY table_name, ordinal_position",
            &[&target_schema],
        )?;

        let pk_rows = client.query(
            "SELECT tc.table_name::text, kcu.column_name::text
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON tc.constraint_name = kcu.constraint_name
              AND tc.table_schema = kcu.table_schema
             WHERE tc.table_schema = $1
               AND tc.constraint_type = 'PRIMARY KEY'",
            &[&target_schema],
        )?;

        let fk_rows = client.query(
            "SELECT
                 tc.table_name::text AS source_table,
                 kcu.column_name::text AS source_column,
                 ccu.table_name::text AS target_table,
                 ccu.column_name::text AS target_column
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON tc.constraint_name = kcu.constraint_name
              AND tc.table_schema = kcu.table_schema
             JOIN information_schema.constraint_column_usage ccu
               ON ccu.constraint_name = tc.constraint_name
              AND ccu.table_schema = tc.table_schema
             WHERE tc.table_schema = $1
               AND tc.constraint_type = 'FOREIGN KEY'",
            &[&target_schema],
        )?;

        let count_rows = client.query(
            "SELECT relname::text, COALESCE(n_live_tup, 0)::bigint
             FROM pg_stat_user_tables
             WHERE schemaname = $1",
            &[&target_schema],
        )?;

        let stats_rows = client.query(
            "SELECT tablename::text, attname::text, n_distinct::float8
             FROM pg_stats
             WHERE schemaname = $1
               AND n_distinct IS NOT NULL",
            &[&target_schema],
        )?;

        let mut pk_lookup: HashMap<String, HashSet<String>> = HashMap::new();
        for row in &pk_rows {
            let table: String = row.get(0);
            let column: String = row.get(1);
            pk_lookup.entry(table).or_default().insert(column);
        }

        let row_counts: HashMap<String, i64> = count_rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
            .collect();

        let n_distinct: HashMap<(String, String), f64> = stats_rows
            .iter()
            .map(|row| {
                (
                    (row.get::<_, String>(0), row.get::<_, String>(1)),
                    row.get::<_, f64>(2),
                )
            })
            .collect();

        let mut columns_by_table: HashMap<String, Vec<ColumnMetadata>> = HashMap::new();
        for row in &column_rows {
            let table: String = row.get(0);
            let column_name: String = row.get(1);
            let is_primary_key = pk_lookup
                .get(&table)
                .is_some_and(|cols| cols.contains(&column_name));
            columns_by_table
                .entry(table)
                .or_default()
                .push(ColumnMetadata {
                    column_name,
                    data_type: row.get(2),
                    udt_name: row.get(3),
                    is_nullable: row.get(4),
                    is_primary_key,
                    ordinal_position: row.get::<_, i32>(5) as u32,
                });
        }

        let relationships: Vec<Relationship> = fk_rows
            .iter()
            .map(|row| Relationship {
                from_table: row.get(0),
                from_column: row.get(1),
                to_table: row.get(2),
                to_column: row.get(3),
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

        let candidates = score_candidates(&tables, &n_distinct);
        debug!(
            engine = "postgres",
            schema = target_schema,
            tables = tables.len(),
            relationships = relationships.len(),
            "introspected schema"
        );

        Ok(SchemaMetadata {
            source: SourceInfo {
                db_engine: "postgres".to_string(),
                schema_name: target_schema.to_string(),
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
