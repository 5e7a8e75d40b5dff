//! Plan normalization against sloppy planner output.

use serde_json::json;

use heron::plan::{
    normalize, CompareAgainst, EntityScope, PlanError, TaskType,
};
use heron::sql::TimeGrain;

#[test]
fn test_well_formed_planner_output_passes_through() {
    let plan = normalize(
        &json!({
            "intent": "top_customers",
            "task_type": "sql_retrieval",
            "entity_scope": "top_n",
            "n": 10,
            "entity_dimension": "customer_name",
            "metric": "revenue",
        }),
        "who are our top 10 customers by revenue?",
    )
    .unwrap();

    assert_eq!(plan.task_type, TaskType::SqlRetrieval);
    assert_eq!(plan.entity_scope, EntityScope::TopN);
    assert_eq!(plan.n, Some(10));
    assert_eq!(plan.entity_dimension.as_deref(), Some("customer_name"));
    assert_eq!(plan.metric.as_deref(), Some("revenue"));
    assert_eq!(plan.planner_source, "external");
}

#[test]
fn test_out_of_vocabulary_intent_is_a_hard_error() {
    let err = normalize(&json!({"intent": "world_peace"}), "q").unwrap_err();
    assert_eq!(err, PlanError::InvalidIntent("world_peace".into()));

    // Missing intent entirely is the same failure.
    assert!(matches!(
        normalize(&json!({"task_type": "sql_retrieval"}), "q"),
        Err(PlanError::InvalidIntent(_))
    ));
}

#[test]
fn test_unrecognized_task_type_falls_back_to_intent() {
    let plan = normalize(
        &json!({"intent": "trend_analysis", "task_type": "forecasting"}),
        "q",
    )
    .unwrap();
    assert_eq!(plan.task_type, TaskType::TrendAnalysis);

    let plan = normalize(
        &json!({"intent": "customer_segmentation", "task_type": "clustering"}),
        "q",
    )
    .unwrap();
    assert_eq!(plan.task_type, TaskType::Segmentation);

    let plan = normalize(
        &json!({"intent": "country_revenue", "task_type": "forecasting"}),
        "q",
    )
    .unwrap();
    assert_eq!(plan.task_type, TaskType::SqlRetrieval);
}

#[test]
fn test_entity_scope_recovered_from_question_text() {
    let plan = normalize(
        &json!({"intent": "top_products", "entity_scope": "best"}),
        "show the top 12 products this year",
    )
    .unwrap();
    assert_eq!(plan.entity_scope, EntityScope::TopN);
    assert_eq!(plan.n, Some(12));

    // No "top <n>" phrase: scope degrades to all.
    let plan = normalize(
        &json!({"intent": "top_products", "entity_scope": "best"}),
        "show our best products",
    )
    .unwrap();
    assert_eq!(plan.entity_scope, EntityScope::All);
}

#[test]
fn test_top_n_with_unusable_n_defaults_to_five() {
    for n in [json!(null), json!(0), json!("zero")] {
        let plan = normalize(
            &json!({"intent": "top_customers", "entity_scope": "top_n", "n": n}),
            "best customers",
        )
        .unwrap();
        assert_eq!(plan.n, Some(5), "n={n} must default to 5");
    }
}

#[test]
fn test_trend_task_gets_month_grain_and_global_compare() {
    let plan = normalize(
        &json!({"intent": "trend_analysis", "time_grain": "decade", "compare_against": "rivals"}),
        "q",
    )
    .unwrap();
    assert_eq!(plan.time_grain, Some(TimeGrain::Month));
    assert_eq!(plan.compare_against, CompareAgainst::Global);
}

#[test]
fn test_non_trend_task_drops_unknown_grain() {
    let plan = normalize(
        &json!({"intent": "monthly_revenue", "time_grain": "decade", "compare_against": "rivals"}),
        "q",
    )
    .unwrap();
    assert_eq!(plan.time_grain, None);
    assert_eq!(plan.compare_against, CompareAgainst::None);
}

#[test]
fn test_signature_stable_for_equal_plans() {
    let raw = json!({
        "intent": "trend_analysis",
        "entity_scope": "top_n",
        "entity_dimension": "country",
        "metric": "total_amount",
    });
    let a = normalize(&raw, "top 5 countries by revenue over time").unwrap();
    let b = normalize(&raw, "top 5 countries by revenue over time").unwrap();
    assert_eq!(a.signature().unwrap(), b.signature().unwrap());

    let c = normalize(&raw, "top 5 countries by profit over time").unwrap();
    assert_ne!(
        a.signature().unwrap(),
        c.signature().unwrap(),
        "question is part of the signature"
    );
}

#[test]
fn test_scope_key_reflects_scoping_fields_only() {
    let raw = json!({
        "intent": "trend_analysis",
        "entity_scope": "top_n",
        "entity_dimension": "country",
        "metric": "total_amount",
        "n": 3,
    });
    let a = normalize(&raw, "one phrasing").unwrap();
    let b = normalize(&raw, "a different phrasing").unwrap();
    // Different questions, same scoping: snapshots share a row.
    assert_eq!(a.scope_key(), b.scope_key());
    assert_eq!(
        a.scope_key(),
        "scope=top_n|dim=country|n=3|metric=total_amount|grain=month|cmp=global"
    );
}
