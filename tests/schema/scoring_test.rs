//! Candidate scoring over a realistic introspected star schema.

use std::collections::HashMap;

use heron::schema::scoring::{normalize_cardinality, score_candidates, CANDIDATE_THRESHOLD};
use heron::schema::{ColumnMetadata, TableMetadata};

fn column(name: &str, data_type: &str, pk: bool, ordinal: u32) -> ColumnMetadata {
    ColumnMetadata {
        column_name: name.to_string(),
        data_type: data_type.to_string(),
        udt_name: data_type.to_string(),
        is_nullable: !pk,
        is_primary_key: pk,
        ordinal_position: ordinal,
    }
}

fn star_schema() -> Vec<TableMetadata> {
    vec![
        TableMetadata {
            table_name: "fact_sales".to_string(),
            row_count: 10_000,
            columns: vec![
                column("id", "bigint", true, 1),
                column("customer_id", "integer", false, 2),
                column("total_amount", "numeric", false, 3),
                column("quantity", "integer", false, 4),
                column("event_date", "date", false, 5),
                column("notes", "text", false, 6),
            ],
        },
        TableMetadata {
            table_name: "dim_customer".to_string(),
            row_count: 500,
            columns: vec![
                column("customer_id", "integer", true, 1),
                column("customer_name", "text", false, 2),
                column("country", "text", false, 3),
            ],
        },
    ]
}

fn stats() -> HashMap<(String, String), f64> {
    let mut stats = HashMap::new();
    // 40 countries out of 500 customers.
    stats.insert(("dim_customer".into(), "country".into()), 40.0);
    // Postgres-style negative estimate: already a ratio.
    stats.insert(("dim_customer".into(), "customer_name".into()), -0.98);
    stats.insert(("fact_sales".into(), "total_amount".into()), 4_000.0);
    stats
}

#[test]
fn test_country_is_a_strong_entity_candidate() {
    let sets = score_candidates(&star_schema(), &stats());
    let country = sets
        .entities
        .iter()
        .find(|e| e.table == "dim_customer" && e.column == "country")
        .expect("country must be an entity candidate");
    // keyword 0.5 + non-pk 0.2 + cardinality band 0.3
    assert_eq!(country.score, 1.0);
    assert_eq!(country.cardinality_ratio, 0.08);
}

#[test]
fn test_negative_distinct_estimate_is_a_ratio() {
    assert_eq!(normalize_cardinality(Some(-0.98), 500), 0.98);
    assert_eq!(normalize_cardinality(Some(40.0), 500), 0.08);
    assert_eq!(normalize_cardinality(None, 500), 0.5);
    assert_eq!(normalize_cardinality(Some(10.0), 0), 0.5);

    // A 0.98 ratio is outside the (0, 0.9) band, so customer_name gets no
    // cardinality bonus and scores keyword + non-pk only.
    let sets = score_candidates(&star_schema(), &stats());
    let name = sets
        .entities
        .iter()
        .find(|e| e.column == "customer_name")
        .expect("customer_name still clears the threshold via keyword");
    assert_eq!(name.score, 0.7);
}

#[test]
fn test_measure_detection_prefers_amount_keywords() {
    let sets = score_candidates(&star_schema(), &stats());
    let amount = sets
        .measures
        .iter()
        .find(|m| m.column == "total_amount")
        .expect("total_amount must be a measure");
    // base 0.2 + keyword 0.6 + cardinality 0.2
    assert_eq!(amount.score, 1.0);
    assert_eq!(amount.default_agg, "sum");

    let quantity = sets.measures.iter().find(|m| m.column == "quantity");
    assert!(quantity.is_some(), "quantity matches the qty keyword family");
}

#[test]
fn test_time_column_detection() {
    let sets = score_candidates(&star_schema(), &stats());
    let event_date = sets
        .time_columns
        .iter()
        .find(|t| t.column == "event_date")
        .expect("event_date must be a time candidate");
    assert_eq!(event_date.default_grain, "month");
    assert!(event_date.score >= CANDIDATE_THRESHOLD);
}

#[test]
fn test_plain_text_column_without_signals_is_excluded() {
    let sets = score_candidates(&star_schema(), &stats());
    // notes: no keyword, non-pk 0.2, neutral 0.5 ratio bonus 0.3 -> 0.5,
    // which clears the threshold; id (pk, bigint) must not.
    assert!(sets.entities.iter().all(|e| e.column != "id"));
}

#[test]
fn test_candidates_sorted_by_score_descending() {
    let sets = score_candidates(&star_schema(), &stats());
    for pair in sets.entities.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for pair in sets.measures.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}
