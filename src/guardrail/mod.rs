//! Textual SQL guardrail.
//!
//! [`validate`] enforces that a candidate SQL string is a single read-only
//! statement before it goes anywhere near a database; the [`allowlist`]
//! submodule additionally checks externally drafted SQL against the known
//! table/column universe of a dataset.
//!
//! This is a textual check, not a SQL parser. It can reject valid edge
//! cases (a column literally named `create`, say). Rejections here are
//! final: the repair loop never retries an unsafe statement.

pub mod allowlist;

use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords that disqualify a statement outright, matched as whole words.
const DENYLIST: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "copy", "call", "do", "vacuum", "comment",
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static DENYLIST_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DENYLIST
        .iter()
        .map(|kw| {
            let pattern = format!(r"\b{kw}\b");
            (*kw, Regex::new(&pattern).expect("valid regex"))
        })
        .collect()
});

/// Guardrail and allow-list rejections.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GuardrailError {
    #[error("SQL is empty")]
    Empty,

    #[error("Multiple SQL statements are not allowed")]
    MultipleStatements,

    #[error("Semicolon is only allowed at the end of SQL")]
    MisplacedSemicolon,

    #[error("Only SELECT/CTE queries are allowed")]
    NotReadOnly,

    #[error("Blocked SQL keyword detected: {0}")]
    BlockedKeyword(&'static str),

    #[error("SQL references non-allowlisted table(s): {0:?}")]
    DisallowedTables(Vec<String>),

    #[error("SQL references non-allowlisted column(s): {0:?}")]
    DisallowedColumns(Vec<String>),
}

fn normalize(sql: &str) -> String {
    WHITESPACE.replace_all(sql.trim(), " ").to_lowercase()
}

/// Validate that `sql` is a single read-only statement.
///
/// Rules, applied in order:
/// 1. reject empty or whitespace-only input;
/// 2. more than one semicolon is rejected, and exactly one only as the
///    final character;
/// 3. after whitespace/case normalization and trailing-semicolon strip, the
///    statement must begin with `select` or `with`;
/// 4. any denylisted keyword appearing as a whole word is rejected,
///    reporting which keyword matched.
///
/// On success, returns the input with any trailing semicolon stripped.
pub fn validate(sql: &str) -> Result<String, GuardrailError> {
    let candidate = sql.trim();
    if candidate.is_empty() {
        return Err(GuardrailError::Empty);
    }

    let semicolons = candidate.matches(';').count();
    if semicolons > 1 {
        return Err(GuardrailError::MultipleStatements);
    }
    if semicolons == 1 && !candidate.ends_with(';') {
        return Err(GuardrailError::MisplacedSemicolon);
    }

    let stripped = candidate.trim_end_matches(';');
    let normalized = normalize(stripped);
    if !(normalized.starts_with("select ") || normalized.starts_with("with ")) {
        return Err(GuardrailError::NotReadOnly);
    }

    for (keyword, pattern) in DENYLIST_PATTERNS.iter() {
        if pattern.is_match(&normalized) {
            return Err(GuardrailError::BlockedKeyword(keyword));
        }
    }

    Ok(stripped.to_string())
}
