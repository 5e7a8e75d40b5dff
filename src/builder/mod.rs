//! Deterministic SQL construction from a plan and a schema snapshot.
//!
//! The builder only ever assembles SQL from identifiers that exist in the
//! schema metadata; it never fabricates tables or columns. When the metadata
//! cannot support the requested shape, the outcome says so with a
//! human-readable reason instead of guessing.

mod segmentation;
mod trend;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::plan::{Plan, TaskType};
use crate::schema::{EntityCandidate, MeasureCandidate, SchemaMetadata, TimeColumnCandidate};
use crate::sql::{Engine, SqlDialect};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

pub(crate) const MEASURE_FALLBACK: &[&str] =
    &["amount", "revenue", "total", "price", "value", "score", "sales"];
pub(crate) const TIME_FALLBACK: &[&str] = &["date", "time", "created", "updated", "timestamp"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("identifier is not safe to quote: {0:?}")]
    InvalidIdentifier(String),
}

/// What the builder produced for a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Ok { sql: String },
    InsufficientData { reason: String },
    UnsupportedTask { reason: String },
}

/// Build SQL for the plan's task type against the given schema snapshot.
pub fn build(
    plan: &Plan,
    metadata: &SchemaMetadata,
    engine: Engine,
) -> Result<BuildOutcome, BuildError> {
    match plan.task_type {
        TaskType::TrendAnalysis => trend::build(plan, metadata, engine),
        TaskType::Segmentation => segmentation::build(plan, metadata, engine),
        TaskType::SqlRetrieval => Ok(BuildOutcome::UnsupportedTask {
            reason: format!(
                "builder does not support task_type={}",
                plan.task_type.as_str()
            ),
        }),
    }
}

/// Validate and quote an identifier for the target engine.
///
/// Identifiers come out of introspected metadata, but they still must match
/// `[A-Za-z_][A-Za-z0-9_]*` before being interpolated into SQL.
pub(crate) fn quote_ident(engine: Engine, name: &str) -> Result<String, BuildError> {
    if !IDENTIFIER.is_match(name) {
        return Err(BuildError::InvalidIdentifier(name.to_string()));
    }
    Ok(engine.quote_identifier(name))
}

/// A scored (table, column) candidate from the schema metadata.
pub(crate) trait ColumnCandidate {
    fn table(&self) -> &str;
    fn column(&self) -> &str;
}

impl ColumnCandidate for EntityCandidate {
    fn table(&self) -> &str {
        &self.table
    }
    fn column(&self) -> &str {
        &self.column
    }
}

impl ColumnCandidate for MeasureCandidate {
    fn table(&self) -> &str {
        &self.table
    }
    fn column(&self) -> &str {
        &self.column
    }
}

impl ColumnCandidate for TimeColumnCandidate {
    fn table(&self) -> &str {
        &self.table
    }
    fn column(&self) -> &str {
        &self.column
    }
}

/// Pick a candidate column: exact match on the requested keyword, then
/// substring match, then the fallback keyword list, then the highest-scored
/// candidate.
pub(crate) fn find_candidate<'a, T: ColumnCandidate>(
    items: &'a [T],
    keyword: Option<&str>,
    fallback_keywords: &[&str],
) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    if let Some(raw) = keyword {
        let wanted = raw.trim().to_lowercase();
        if !wanted.is_empty() {
            if let Some(exact) = items.iter().find(|i| i.column().to_lowercase() == wanted) {
                return Some(exact);
            }
            if let Some(contains) = items
                .iter()
                .find(|i| i.column().to_lowercase().contains(&wanted))
            {
                return Some(contains);
            }
        }
    }
    for kw in fallback_keywords {
        if let Some(found) = items.iter().find(|i| i.column().to_lowercase().contains(kw)) {
            return Some(found);
        }
    }
    items.first()
}
