//! Bounded repair/retry orchestration.
//!
//! One request runs a small state machine: generate SQL (or take it from the
//! plan cache), execute it, evaluate the result. A retry-worthy evaluation or
//! an execution failure re-invokes the drafter with the previous SQL and a
//! classified error message, up to `max_repairs` additional attempts. The
//! guardrail and allow-list sit between generation and execution; their
//! rejections are final and never re-enter the loop.
//!
//! Every run appends one trace row to the store, whichever way it exits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{DatabaseAdapter, Row};
use crate::config::LimitSettings;
use crate::drafter::{metadata_context, DraftRequest, SqlDrafter};
use crate::error::HeronError;
use crate::guardrail::{self, allowlist};
use crate::plan::Plan;
use crate::schema::SchemaMetadata;
use crate::store::{MetadataStore, DEFAULT_DATASET};

/// Coarse failure category derived from an execution error's message.
///
/// Fed back into SQL regeneration as a hint; it never changes control flow
/// beyond logging and prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    MissingColumn,
    MissingTable,
    AmbiguousReference,
    SyntaxError,
    TypeMismatch,
    Timeout,
    ExecutionError,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::MissingColumn => "missing_column",
            ErrorClass::MissingTable => "missing_table",
            ErrorClass::AmbiguousReference => "ambiguous_reference",
            ErrorClass::SyntaxError => "syntax_error",
            ErrorClass::TypeMismatch => "type_mismatch",
            ErrorClass::Timeout => "timeout",
            ErrorClass::ExecutionError => "execution_error",
        }
    }
}

/// Classify an execution error by substring matching on its message.
/// Checks run in declaration order; the first match wins.
pub fn classify(message: &str) -> ErrorClass {
    let text = message.to_lowercase();
    if text.contains("does not exist") && text.contains("column") {
        ErrorClass::MissingColumn
    } else if text.contains("does not exist") && text.contains("table") {
        ErrorClass::MissingTable
    } else if text.contains("ambiguous") {
        ErrorClass::AmbiguousReference
    } else if text.contains("syntax error") {
        ErrorClass::SyntaxError
    } else if text.contains("operator does not exist") || text.contains("type") {
        ErrorClass::TypeMismatch
    } else if text.contains("timeout") {
        ErrorClass::Timeout
    } else {
        ErrorClass::ExecutionError
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    Ok,
    Retry,
}

/// Verdict on an executed result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub status: EvalStatus,
    pub reason: Option<String>,
}

/// Empty result sets are retry-worthy; anything else is ok.
pub fn evaluate(rows: &[Row]) -> Evaluation {
    if rows.is_empty() {
        Evaluation {
            status: EvalStatus::Retry,
            reason: Some("query_returned_no_rows".to_string()),
        }
    } else {
        Evaluation {
            status: EvalStatus::Ok,
            reason: None,
        }
    }
}

/// What one orchestrated run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub sql: String,
    pub rows: Vec<Row>,
    pub evaluation: Evaluation,
    pub attempts_used: u32,
    pub cache_hit: bool,
    pub trace_id: String,
}

/// One row of the append-only trace log.
#[derive(Debug, Serialize)]
struct QueryTrace<'a> {
    trace_id: &'a str,
    question: &'a str,
    dataset_id: Option<&'a str>,
    plan_signature: &'a str,
    sql: &'a str,
    attempts: u32,
    cache_hit: bool,
    status: &'a str,
    error: Option<String>,
    rows_returned: usize,
}

pub struct Orchestrator<'a> {
    adapter: Box<dyn DatabaseAdapter>,
    drafter: Box<dyn SqlDrafter>,
    store: &'a MetadataStore,
    max_repairs: u32,
    row_limit: u32,
    timeout_ms: u64,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        adapter: Box<dyn DatabaseAdapter>,
        drafter: Box<dyn SqlDrafter>,
        store: &'a MetadataStore,
    ) -> Self {
        Self::with_limits(adapter, drafter, store, &LimitSettings::default())
    }

    pub fn with_limits(
        adapter: Box<dyn DatabaseAdapter>,
        drafter: Box<dyn SqlDrafter>,
        store: &'a MetadataStore,
        limits: &LimitSettings,
    ) -> Self {
        Self {
            adapter,
            drafter,
            store,
            max_repairs: limits.max_repairs,
            row_limit: limits.row_limit,
            timeout_ms: limits.timeout_ms,
        }
    }

    /// Run one request end to end.
    ///
    /// `max_repairs` bounds the loop: the initial execution plus up to that
    /// many repair attempts. Guardrail and allow-list rejections of drafted
    /// SQL abort immediately. Exhausting the budget with a standing execution
    /// error surfaces it as [`HeronError::RepairExhausted`]; exhausting it
    /// with only empty results returns a report with a `retry` evaluation.
    pub fn run(
        &self,
        question: &str,
        plan: &Plan,
        dataset_id: Option<&str>,
    ) -> Result<RunReport, HeronError> {
        let trace_id = Uuid::new_v4().to_string();
        let plan_signature = plan.signature()?;

        let metadata = self.load_or_introspect_metadata(dataset_id)?;
        let schema_hash = metadata.schema_hash()?;
        let context = metadata_context(&metadata);

        let cached = self
            .store
            .get_cached_sql(dataset_id, &plan_signature, Some(&schema_hash))?;
        if cached.is_some() {
            debug!(trace_id = %trace_id, "plan cache hit");
        }
        let mut pending: Option<(String, bool)> = cached.map(|sql| (sql, true));

        let mut attempts: u32 = 0;
        let mut previous_sql: Option<String> = None;
        let mut error_message: Option<String> = None;

        loop {
            let (sql, from_cache) = match pending.take() {
                Some(entry) => entry,
                None => {
                    let request = DraftRequest {
                        question: question.to_string(),
                        plan: plan.clone(),
                        metadata_context: context.clone(),
                        previous_sql: previous_sql.clone(),
                        error_message: error_message.clone(),
                    };
                    let drafted = self.drafter.draft(&request)?;
                    let safe = guardrail::validate(&drafted)?;
                    allowlist::enforce(&safe, &metadata)?;
                    (safe, false)
                }
            };

            attempts += 1;
            debug!(trace_id = %trace_id, attempt = attempts, from_cache, "executing");

            match self
                .adapter
                .execute_select(&sql, self.row_limit, self.timeout_ms)
            {
                Ok(rows) => {
                    let evaluation = evaluate(&rows);
                    match evaluation.status {
                        EvalStatus::Ok => {
                            if !from_cache {
                                self.store.set_cached_sql(
                                    dataset_id,
                                    &plan_signature,
                                    &sql,
                                    Some(&schema_hash),
                                )?;
                            }
                            self.append_trace(QueryTrace {
                                trace_id: &trace_id,
                                question,
                                dataset_id,
                                plan_signature: &plan_signature,
                                sql: &sql,
                                attempts,
                                cache_hit: from_cache,
                                status: "ok",
                                error: None,
                                rows_returned: rows.len(),
                            });
                            info!(trace_id = %trace_id, attempts, rows = rows.len(), "run ok");
                            return Ok(RunReport {
                                sql,
                                rows,
                                evaluation,
                                attempts_used: attempts,
                                cache_hit: from_cache,
                                trace_id,
                            });
                        }
                        EvalStatus::Retry => {
                            if attempts > self.max_repairs {
                                self.append_trace(QueryTrace {
                                    trace_id: &trace_id,
                                    question,
                                    dataset_id,
                                    plan_signature: &plan_signature,
                                    sql: &sql,
                                    attempts,
                                    cache_hit: from_cache,
                                    status: "retry",
                                    error: evaluation.reason.clone(),
                                    rows_returned: 0,
                                });
                                info!(trace_id = %trace_id, attempts, "budget exhausted, empty result");
                                return Ok(RunReport {
                                    sql,
                                    rows,
                                    evaluation,
                                    attempts_used: attempts,
                                    cache_hit: from_cache,
                                    trace_id,
                                });
                            }
                            error_message = evaluation.reason.clone();
                            previous_sql = Some(sql);
                        }
                    }
                }
                Err(err) => {
                    let class = classify(&err.to_string());
                    if attempts > self.max_repairs {
                        self.append_trace(QueryTrace {
                            trace_id: &trace_id,
                            question,
                            dataset_id,
                            plan_signature: &plan_signature,
                            sql: &sql,
                            attempts,
                            cache_hit: from_cache,
                            status: class.as_str(),
                            error: Some(err.to_string()),
                            rows_returned: 0,
                        });
                        warn!(trace_id = %trace_id, attempts, class = class.as_str(), "budget exhausted");
                        return Err(HeronError::RepairExhausted {
                            class,
                            sql,
                            attempts,
                            source: err,
                        });
                    }
                    debug!(trace_id = %trace_id, class = class.as_str(), "execution failed, repairing");
                    error_message = Some(format!("{} ({})", err, class.as_str()));
                    previous_sql = Some(sql);
                }
            }
        }
    }

    /// Schema metadata for the dataset, from the store if present, otherwise
    /// freshly introspected and saved for next time.
    fn load_or_introspect_metadata(
        &self,
        dataset_id: Option<&str>,
    ) -> Result<SchemaMetadata, HeronError> {
        let key = dataset_id.unwrap_or(DEFAULT_DATASET);
        if let Some(stored) = self.store.load_schema_metadata(key)? {
            return Ok(serde_json::from_value(stored)?);
        }
        let metadata = self.adapter.introspect_schema(None)?;
        let hash = metadata.schema_hash()?;
        let as_json: Value = serde_json::to_value(&metadata)?;
        self.store.save_schema_metadata(key, &hash, &as_json)?;
        Ok(metadata)
    }

    fn append_trace(&self, trace: QueryTrace<'_>) {
        if let Err(err) = self.store.append_query_trace(&trace) {
            warn!(error = %err, "failed to append query trace");
        }
    }
}
