//! Heuristic candidate scoring for introspected columns.
//!
//! Every adapter runs the same scoring pass over its raw introspection
//! output, so the candidate lists look identical regardless of engine.
//! Scores combine a keyword bonus on the column name with type and
//! cardinality signals; a column becomes a candidate when its total clears
//! [`CANDIDATE_THRESHOLD`].

use std::collections::HashMap;

use super::{EntityCandidate, MeasureCandidate, TableMetadata, TimeColumnCandidate};

/// Minimum total score for a column to be listed as a candidate.
pub const CANDIDATE_THRESHOLD: f64 = 0.45;

const ENTITY_KEYWORDS: &[&str] = &[
    "country", "customer", "product", "category", "region", "segment", "name",
];
const MEASURE_KEYWORDS: &[&str] = &[
    "amount", "revenue", "price", "total", "qty", "quantity", "sales", "value", "score",
];
const TIME_KEYWORDS: &[&str] = &["date", "time", "created", "updated", "timestamp"];

const NUMERIC_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "bigint",
    "numeric",
    "decimal",
    "real",
    "double precision",
];
const TEXT_TYPES: &[&str] = &["text", "character varying", "character", "varchar", "char"];
const TIME_TYPES: &[&str] = &[
    "date",
    "timestamp without time zone",
    "timestamp with time zone",
    "time without time zone",
    "time with time zone",
];

/// The three ranked candidate lists produced by one scoring pass.
#[derive(Debug, Default)]
pub struct CandidateSets {
    pub entities: Vec<EntityCandidate>,
    pub measures: Vec<MeasureCandidate>,
    pub time_columns: Vec<TimeColumnCandidate>,
}

fn keyword_score(name: &str, keywords: &[&str], weight: f64) -> f64 {
    let lowered = name.to_lowercase();
    if keywords.iter().any(|key| lowered.contains(key)) {
        weight
    } else {
        0.0
    }
}

/// Normalize a distinct-value estimate into a [0, 1] cardinality ratio.
///
/// Negative estimates (as produced by Postgres statistics) are already a
/// ratio of the row count; positive estimates are divided by it. Missing
/// statistics land on a neutral 0.5.
pub fn normalize_cardinality(n_distinct: Option<f64>, row_count: i64) -> f64 {
    match n_distinct {
        None => 0.5,
        Some(_) if row_count <= 0 => 0.5,
        Some(n) if n < 0.0 => n.abs().clamp(0.0, 1.0),
        Some(n) => (n / row_count as f64).clamp(0.0, 1.0),
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Score every column of every table and return the sorted candidate lists.
///
/// `n_distinct` maps `(table, column)` to the engine's distinct-value
/// estimate where one is available.
pub fn score_candidates(
    tables: &[TableMetadata],
    n_distinct: &HashMap<(String, String), f64>,
) -> CandidateSets {
    let mut sets = CandidateSets::default();

    for table in tables {
        for col in &table.columns {
            let data_type = col.data_type.as_str();
            let key = (table.table_name.clone(), col.column_name.clone());
            let ratio = normalize_cardinality(n_distinct.get(&key).copied(), table.row_count);

            if TEXT_TYPES.contains(&data_type) || data_type == "integer" || data_type == "bigint" {
                let mut score = keyword_score(&col.column_name, ENTITY_KEYWORDS, 0.5);
                if !col.is_primary_key {
                    score += 0.2;
                }
                if ratio > 0.0 && ratio < 0.9 {
                    score += 0.3;
                }
                if score >= CANDIDATE_THRESHOLD {
                    sets.entities.push(EntityCandidate {
                        table: table.table_name.clone(),
                        column: col.column_name.clone(),
                        data_type: data_type.to_string(),
                        row_count: table.row_count,
                        cardinality_ratio: round4(ratio),
                        score: round4(score),
                    });
                }
            }

            if NUMERIC_TYPES.contains(&data_type) {
                let mut score = 0.2 + keyword_score(&col.column_name, MEASURE_KEYWORDS, 0.6);
                if ratio > 0.01 {
                    score += 0.2;
                }
                if score >= CANDIDATE_THRESHOLD {
                    sets.measures.push(MeasureCandidate {
                        table: table.table_name.clone(),
                        column: col.column_name.clone(),
                        data_type: data_type.to_string(),
                        row_count: table.row_count,
                        cardinality_ratio: round4(ratio),
                        score: round4(score),
                        default_agg: "sum".to_string(),
                    });
                }
            }

            if TIME_TYPES.contains(&data_type) {
                let score = 0.3 + keyword_score(&col.column_name, TIME_KEYWORDS, 0.6);
                if score >= CANDIDATE_THRESHOLD {
                    sets.time_columns.push(TimeColumnCandidate {
                        table: table.table_name.clone(),
                        column: col.column_name.clone(),
                        data_type: data_type.to_string(),
                        score: round4(score),
                        default_grain: "month".to_string(),
                    });
                }
            }
        }
    }

    // Stable sorts keep introspection order for equal scores.
    sets.entities
        .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    sets.measures
        .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    sets.time_columns
        .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    sets
}
