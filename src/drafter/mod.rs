//! External SQL drafter seam.
//!
//! The crate does not ship an LLM client. It defines the [`SqlDrafter`]
//! trait plus the context/response plumbing every implementation needs: a
//! bounded textual rendering of the schema metadata for the prompt, and a
//! tolerant parser for the `{"sql": "..."}` response shape. Drafted SQL is
//! untrusted; the orchestrator runs it through the guardrail and allow-list
//! before anything touches a database.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::plan::Plan;
use crate::schema::SchemaMetadata;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex")
});
static INLINE_JSON: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

const MAX_TABLES: usize = 40;
const MAX_CANDIDATES: usize = 10;
const MAX_RELATIONSHIPS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("drafter response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("drafter response missing `sql`")]
    MissingSql,

    #[error("drafter failed: {0}")]
    Failed(String),
}

/// Everything a drafter gets to work with for one attempt.
///
/// `previous_sql` and `error_message` are set on repair attempts so the
/// drafter can see what failed and why.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub question: String,
    pub plan: Plan,
    pub metadata_context: String,
    pub previous_sql: Option<String>,
    pub error_message: Option<String>,
}

/// Produces candidate SQL for a request. Implementations typically call an
/// external model; tests use canned fakes.
pub trait SqlDrafter {
    fn draft(&self, request: &DraftRequest) -> Result<String, DraftError>;
}

/// Render schema metadata into the bounded textual context drafters see.
///
/// Long schemas are truncated rather than split: the first 40 tables, 10
/// candidates per list, and 20 relationships.
pub fn metadata_context(metadata: &SchemaMetadata) -> String {
    let tables: Vec<&str> = metadata
        .tables
        .iter()
        .take(MAX_TABLES)
        .map(|t| t.table_name.as_str())
        .collect();
    let entities: Vec<String> = metadata
        .entities
        .iter()
        .take(MAX_CANDIDATES)
        .map(|e| format!("{}.{}", e.table, e.column))
        .collect();
    let measures: Vec<String> = metadata
        .measures
        .iter()
        .take(MAX_CANDIDATES)
        .map(|m| format!("{}.{}", m.table, m.column))
        .collect();
    let time_columns: Vec<String> = metadata
        .time_columns
        .iter()
        .take(MAX_CANDIDATES)
        .map(|t| format!("{}.{}", t.table, t.column))
        .collect();
    let relationships: Vec<String> = metadata
        .relationships
        .iter()
        .take(MAX_RELATIONSHIPS)
        .map(|r| {
            format!(
                "{}.{} -> {}.{}",
                r.from_table, r.from_column, r.to_table, r.to_column
            )
        })
        .collect();

    format!(
        "Allowed tables: {tables:?}\n\
         Entity candidates: {entities:?}\n\
         Measure candidates: {measures:?}\n\
         Time candidates: {time_columns:?}\n\
         Relationships: {relationships:?}"
    )
}

/// Extract the first JSON object from a drafter response, tolerating fenced
/// code blocks and surrounding prose.
pub fn extract_json_blob(text: &str) -> Result<Value, DraftError> {
    if let Some(cap) = FENCED_JSON.captures(text) {
        return Ok(serde_json::from_str(&cap[1])?);
    }
    if let Some(m) = INLINE_JSON.find(text) {
        return Ok(serde_json::from_str(m.as_str())?);
    }
    Ok(serde_json::from_str(text)?)
}

/// Parse a drafter response into the SQL it proposes.
pub fn parse_sql_response(text: &str) -> Result<String, DraftError> {
    let blob = extract_json_blob(text)?;
    let sql = blob
        .get("sql")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if sql.is_empty() {
        return Err(DraftError::MissingSql);
    }
    Ok(sql.to_string())
}
