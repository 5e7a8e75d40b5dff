//! SQLite-backed metadata store.
//!
//! Persists everything the pipeline needs to remember between requests:
//! registered datasets, their latest schema-metadata snapshot, the plan→SQL
//! cache, versioned mining snapshots, and the append-only query trace log.
//!
//! # Design
//!
//! - Composite-key upserts (`INSERT ... ON CONFLICT DO UPDATE`) so concurrent
//!   writers to the same key never leave partial state; last commit wins.
//! - Versioned - auto-clears cached rows on schema version mismatch.
//! - Constructed explicitly and passed by reference; no process-wide
//!   singleton.
//!
//! # Key layout
//!
//! ```text
//! plan_sql_cache:  {dataset|global}::{schema_hash|none}::{plan_signature}
//! snapshots:       (snapshot_type, dataset_id|__default__, scope_key)
//! ```

pub mod hash;
pub use hash::compute_hash;

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current store schema version. Bump this when the layout changes.
const STORE_VERSION: i32 = 1;

/// Dataset key used when no dataset is supplied.
pub const DEFAULT_DATASET: &str = "__default__";

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A registered dataset (metadata only; the data lives in the target engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub dataset_id: String,
    pub name: String,
    pub source_type: String,
    pub db_engine: String,
    pub schema_name: String,
    pub status: String,
    pub schema_hash: Option<String>,
    pub row_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the versioned snapshot table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_type: String,
    pub dataset_id: String,
    pub scope_key: String,
    pub snapshot_json: Value,
    pub source_max_date: Option<NaiveDate>,
    pub snapshot_version: i64,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
}

/// SQLite-backed metadata store.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open or create the store at the given path.
    ///
    /// If the stored schema version doesn't match, cached rows are cleared.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS datasets (
                dataset_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                db_engine TEXT NOT NULL,
                schema_name TEXT NOT NULL,
                status TEXT NOT NULL,
                schema_hash TEXT,
                row_count INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schema_metadata (
                dataset_id TEXT PRIMARY KEY,
                schema_hash TEXT NOT NULL,
                metadata TEXT NOT NULL,
                generated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plan_sql_cache (
                cache_key TEXT PRIMARY KEY,
                dataset_id TEXT,
                schema_hash TEXT,
                plan_signature TEXT NOT NULL,
                sql_text TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                snapshot_type TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                scope_key TEXT NOT NULL,
                snapshot_json TEXT NOT NULL,
                source_max_date TEXT,
                snapshot_version INTEGER NOT NULL DEFAULT 1,
                run_id TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                PRIMARY KEY (snapshot_type, dataset_id, scope_key)
            );

            CREATE TABLE IF NOT EXISTS query_traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored_version {
            Some(v) if v == STORE_VERSION => {}
            Some(_) => {
                // Version mismatch: cached derivations are rebuildable, clear them.
                self.conn
                    .execute_batch("DELETE FROM plan_sql_cache; DELETE FROM snapshots;")?;
                self.set_version()?;
            }
            None => {
                self.set_version()?;
            }
        }

        Ok(())
    }

    fn set_version(&self) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
            params![STORE_VERSION.to_string()],
        )?;
        Ok(())
    }

    // ===== Datasets =====

    /// Register a dataset, or refresh its row if the id already exists.
    pub fn register_dataset(&self, record: &DatasetRecord) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO datasets
                 (dataset_id, name, source_type, db_engine, schema_name, status,
                  schema_hash, row_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (dataset_id) DO UPDATE SET
                 name = excluded.name,
                 source_type = excluded.source_type,
                 db_engine = excluded.db_engine,
                 schema_name = excluded.schema_name,
                 status = excluded.status,
                 schema_hash = excluded.schema_hash,
                 row_count = excluded.row_count,
                 updated_at = excluded.updated_at",
            params![
                record.dataset_id,
                record.name,
                record.source_type,
                record.db_engine,
                record.schema_name,
                record.status,
                record.schema_hash,
                record.row_count,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a dataset by id.
    pub fn get_dataset(&self, dataset_id: &str) -> StoreResult<Option<DatasetRecord>> {
        self.conn
            .query_row(
                "SELECT dataset_id, name, source_type, db_engine, schema_name, status,
                        schema_hash, row_count, created_at, updated_at
                 FROM datasets WHERE dataset_id = ?",
                params![dataset_id],
                Self::dataset_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// List all datasets, most recently updated first.
    pub fn list_datasets(&self) -> StoreResult<Vec<DatasetRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset_id, name, source_type, db_engine, schema_name, status,
                    schema_hash, row_count, created_at, updated_at
             FROM datasets ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], Self::dataset_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update a dataset's status.
    pub fn update_dataset_status(&self, dataset_id: &str, status: &str) -> StoreResult<bool> {
        let rows = self.conn.execute(
            "UPDATE datasets SET status = ?, updated_at = ? WHERE dataset_id = ?",
            params![status, Utc::now().to_rfc3339(), dataset_id],
        )?;
        Ok(rows > 0)
    }

    fn dataset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatasetRecord> {
        let created: String = row.get(8)?;
        let updated: String = row.get(9)?;
        Ok(DatasetRecord {
            dataset_id: row.get(0)?,
            name: row.get(1)?,
            source_type: row.get(2)?,
            db_engine: row.get(3)?,
            schema_name: row.get(4)?,
            status: row.get(5)?,
            schema_hash: row.get(6)?,
            row_count: row.get(7)?,
            created_at: parse_ts(&created),
            updated_at: parse_ts(&updated),
        })
    }

    // ===== Schema metadata =====

    /// Replace the stored schema metadata for a dataset wholesale.
    pub fn save_schema_metadata(
        &self,
        dataset_id: &str,
        schema_hash: &str,
        metadata: &Value,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO schema_metadata (dataset_id, schema_hash, metadata, generated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (dataset_id) DO UPDATE SET
                 schema_hash = excluded.schema_hash,
                 metadata = excluded.metadata,
                 generated_at = excluded.generated_at",
            params![
                dataset_id,
                schema_hash,
                serde_json::to_string(metadata)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Load the stored schema metadata for a dataset.
    pub fn load_schema_metadata(&self, dataset_id: &str) -> StoreResult<Option<Value>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT metadata FROM schema_metadata WHERE dataset_id = ?",
                params![dataset_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Load just the schema hash for a dataset.
    pub fn load_schema_hash(&self, dataset_id: &str) -> StoreResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT schema_hash FROM schema_metadata WHERE dataset_id = ?",
                params![dataset_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    // ===== Plan -> SQL cache =====

    fn plan_cache_key(dataset_id: Option<&str>, plan_signature: &str, schema_hash: Option<&str>) -> String {
        let dataset_key = dataset_id.unwrap_or("global");
        let schema_key = schema_hash.unwrap_or("none");
        format!("{dataset_key}::{schema_key}::{plan_signature}")
    }

    /// Look up previously validated SQL for a plan.
    pub fn get_cached_sql(
        &self,
        dataset_id: Option<&str>,
        plan_signature: &str,
        schema_hash: Option<&str>,
    ) -> StoreResult<Option<String>> {
        let key = Self::plan_cache_key(dataset_id, plan_signature, schema_hash);
        self.conn
            .query_row(
                "SELECT sql_text FROM plan_sql_cache WHERE cache_key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Store validated SQL for a plan (upsert; never partially written).
    pub fn set_cached_sql(
        &self,
        dataset_id: Option<&str>,
        plan_signature: &str,
        sql: &str,
        schema_hash: Option<&str>,
    ) -> StoreResult<()> {
        let key = Self::plan_cache_key(dataset_id, plan_signature, schema_hash);
        self.conn.execute(
            "INSERT INTO plan_sql_cache
                 (cache_key, dataset_id, schema_hash, plan_signature, sql_text, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (cache_key) DO UPDATE SET
                 sql_text = excluded.sql_text,
                 updated_at = excluded.updated_at,
                 dataset_id = excluded.dataset_id,
                 schema_hash = excluded.schema_hash,
                 plan_signature = excluded.plan_signature",
            params![
                key,
                dataset_id,
                schema_hash,
                plan_signature,
                sql,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // ===== Snapshots =====

    /// Load a snapshot row, if one exists for the composite key.
    pub fn load_snapshot(
        &self,
        snapshot_type: &str,
        dataset_id: &str,
        scope_key: &str,
    ) -> StoreResult<Option<SnapshotRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT snapshot_type, dataset_id, scope_key, snapshot_json,
                        source_max_date, snapshot_version, run_id, generated_at
                 FROM snapshots
                 WHERE snapshot_type = ?1 AND dataset_id = ?2 AND scope_key = ?3",
                params![snapshot_type, dataset_id, scope_key],
                Self::snapshot_from_row,
            )
            .optional()?;
        match row {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    /// Insert or refresh a snapshot, bumping its version atomically.
    ///
    /// A fresh row starts at version 1; every subsequent upsert for the same
    /// key increments the version and replaces `run_id`, payload, and
    /// timestamps in one statement.
    pub fn upsert_snapshot(
        &self,
        snapshot_type: &str,
        dataset_id: &str,
        scope_key: &str,
        snapshot_json: &Value,
        source_max_date: Option<NaiveDate>,
    ) -> StoreResult<SnapshotRecord> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let generated_at = Utc::now();
        self.conn.execute(
            "INSERT INTO snapshots
                 (snapshot_type, dataset_id, scope_key, snapshot_json,
                  source_max_date, snapshot_version, run_id, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)
             ON CONFLICT (snapshot_type, dataset_id, scope_key) DO UPDATE SET
                 snapshot_json = excluded.snapshot_json,
                 source_max_date = excluded.source_max_date,
                 snapshot_version = snapshots.snapshot_version + 1,
                 run_id = excluded.run_id,
                 generated_at = excluded.generated_at",
            params![
                snapshot_type,
                dataset_id,
                scope_key,
                serde_json::to_string(snapshot_json)?,
                source_max_date.map(|d| d.to_string()),
                run_id,
                generated_at.to_rfc3339(),
            ],
        )?;

        // Read back: the stored version reflects any concurrent increments.
        self.load_snapshot(snapshot_type, dataset_id, scope_key)?
            .ok_or_else(|| StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    fn snapshot_from_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<StoreResult<SnapshotRecord>> {
        let json: String = row.get(3)?;
        let source_max_date: Option<String> = row.get(4)?;
        let generated_at: String = row.get(7)?;
        Ok((|| {
            Ok(SnapshotRecord {
                snapshot_type: row.get(0)?,
                dataset_id: row.get(1)?,
                scope_key: row.get(2)?,
                snapshot_json: serde_json::from_str(&json)?,
                source_max_date: source_max_date.and_then(|s| s.parse().ok()),
                snapshot_version: row.get(5)?,
                run_id: row.get(6)?,
                generated_at: parse_ts(&generated_at),
            })
        })())
    }

    // ===== Query traces =====

    /// Append one trace to the log. Traces are write-once.
    pub fn append_query_trace<T: Serialize>(&self, trace: &T) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO query_traces (trace_json, created_at) VALUES (?1, ?2)",
            params![serde_json::to_string(trace)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load the most recent traces, returned oldest-first.
    pub fn load_query_traces(&self, limit: Option<usize>) -> StoreResult<Vec<Value>> {
        let mut stmt = self.conn.prepare(
            "SELECT trace_json FROM query_traces ORDER BY id DESC LIMIT ?",
        )?;
        let cap = limit.map(|n| n as i64).unwrap_or(-1);
        let mut traces = stmt
            .query_map(params![cap], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?
            .into_iter()
            .map(|s| serde_json::from_str(&s))
            .collect::<Result<Vec<Value>, _>>()?;
        traces.reverse();
        Ok(traces)
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
