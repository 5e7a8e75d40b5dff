//! Schema allow-list enforcement for externally drafted SQL.
//!
//! Extracts table and column references textually and checks them against
//! the known universe in [`SchemaMetadata`]. Bare column names are left
//! alone since a textual scan cannot resolve them, but every dotted
//! reference must resolve through a bound alias or a known table.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::SchemaMetadata;

use super::GuardrailError;

static TABLE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_\.]*)").expect("valid regex")
});

static ALIAS_BINDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_\.]*)(?:\s+(?:as\s+)?([A-Za-z_][A-Za-z0-9_]*))?",
    )
    .expect("valid regex")
});

static QUALIFIED_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)\b")
        .expect("valid regex")
});

/// Words that can follow a table reference but are never aliases.
const ALIAS_STOPWORDS: &[&str] = &[
    "on", "where", "group", "order", "join", "inner", "left", "right", "cross", "using",
    "select", "limit", "having", "union",
];

fn strip_quotes(ident: &str) -> &str {
    ident.trim_matches(|c| c == '"' || c == '`')
}

/// Reduce a possibly schema-qualified reference to its bare table name.
fn bare_table_name(reference: &str) -> String {
    let unquoted = strip_quotes(reference);
    unquoted
        .rsplit('.')
        .next()
        .unwrap_or(unquoted)
        .to_lowercase()
}

/// Check every table and alias-qualified column reference in `sql` against
/// the tables and columns recorded in `metadata`.
///
/// Matching is case-insensitive. Table references are reduced to their bare
/// name before the table check, but the dotted-reference scan resolves
/// qualifiers only through the alias map or a known table name, so
/// schema-qualified references like `public.orders` are rejected there.
/// Violations accumulate; table violations are reported before column
/// violations.
pub fn enforce(sql: &str, metadata: &SchemaMetadata) -> Result<(), GuardrailError> {
    let known_tables: HashMap<String, &str> = metadata
        .table_names()
        .into_iter()
        .map(|name| (name.to_lowercase(), name))
        .collect();
    let known_columns: HashMap<String, BTreeSet<String>> = metadata
        .columns_by_table()
        .into_iter()
        .map(|(table, cols)| {
            (
                table.to_lowercase(),
                cols.into_iter().map(|c| c.to_lowercase()).collect(),
            )
        })
        .collect();

    let mut bad_tables: BTreeSet<String> = BTreeSet::new();
    for cap in TABLE_REF.captures_iter(sql) {
        let name = bare_table_name(&cap[1]);
        if !known_tables.contains_key(&name) {
            bad_tables.insert(name);
        }
    }
    if !bad_tables.is_empty() {
        return Err(GuardrailError::DisallowedTables(
            bad_tables.into_iter().collect(),
        ));
    }

    // Map aliases back to the tables they were bound to, so alias-qualified
    // columns can be checked against the right column set.
    let mut alias_to_table: HashMap<String, String> = HashMap::new();
    for cap in ALIAS_BINDING.captures_iter(sql) {
        let table = bare_table_name(&cap[1]);
        alias_to_table.insert(table.clone(), table.clone());
        if let Some(alias) = cap.get(2) {
            let alias = alias.as_str().to_lowercase();
            if !ALIAS_STOPWORDS.contains(&alias.as_str()) {
                alias_to_table.insert(alias, table);
            }
        }
    }

    let mut bad_columns: BTreeSet<String> = BTreeSet::new();
    for cap in QUALIFIED_COLUMN.captures_iter(sql) {
        let qualifier = cap[1].to_lowercase();
        let column = cap[2].to_lowercase();
        let table = alias_to_table.get(&qualifier).unwrap_or(&qualifier);
        match known_columns.get(table) {
            Some(cols) if cols.contains(&column) => {}
            Some(_) => {
                bad_columns.insert(format!("{qualifier}.{column} (column not in {table})"));
            }
            None => {
                bad_columns.insert(format!("{qualifier}.{column} (unknown table)"));
            }
        }
    }
    if !bad_columns.is_empty() {
        return Err(GuardrailError::DisallowedColumns(
            bad_columns.into_iter().collect(),
        ));
    }

    Ok(())
}
