//! Trend SQL construction.
//!
//! Rolls a measure up over a date-bucketed time column. For top-N scopes the
//! query runs in two stages: a base rollup per (period, entity), a CTE that
//! keeps the N entities with the largest total, and a final join so only
//! those entities appear in the output.

use crate::plan::{EntityScope, Plan};
use crate::schema::SchemaMetadata;
use crate::sql::{Engine, SqlDialect};

use super::{find_candidate, quote_ident, BuildError, BuildOutcome, MEASURE_FALLBACK, TIME_FALLBACK};

const ENTITY_FALLBACK: &[&str] = &[
    "country", "customer", "product", "category", "segment", "region", "name",
];

pub(crate) fn build(
    plan: &Plan,
    metadata: &SchemaMetadata,
    engine: Engine,
) -> Result<BuildOutcome, BuildError> {
    let measure = find_candidate(&metadata.measures, plan.metric.as_deref(), MEASURE_FALLBACK);
    let time_col = find_candidate(&metadata.time_columns, None, TIME_FALLBACK);
    let (Some(measure), Some(time_col)) = (measure, time_col) else {
        return Ok(BuildOutcome::InsufficientData {
            reason: "No suitable measure/time columns found in schema metadata.".to_string(),
        });
    };

    if measure.table != time_col.table {
        return Ok(BuildOutcome::InsufficientData {
            reason: "Measure and time columns are on different tables; join inference for trend \
                     is not available yet."
                .to_string(),
        });
    }

    let m_table = quote_ident(engine, &measure.table)?;
    let m_col = quote_ident(engine, &measure.column)?;
    let t_col = quote_ident(engine, &time_col.column)?;

    let grain = plan.time_grain.map(|g| g.as_str());
    let period_expr = engine.render_date_bucket(&format!("f.{t_col}"), grain);
    let value_expr = format!("SUM(f.{m_col})");

    let entity = if plan.entity_scope == EntityScope::TopN {
        find_candidate(
            &metadata.entities,
            plan.entity_dimension.as_deref(),
            ENTITY_FALLBACK,
        )
    } else {
        None
    };

    let (entity_select, join_clause) = match entity {
        Some(entity) if entity.table != measure.table => {
            let Some((left_col, right_col)) =
                metadata.find_relationship(&measure.table, &entity.table)
            else {
                return Ok(BuildOutcome::InsufficientData {
                    reason: "Top-N entity requested but relationship to measure table was not \
                             found."
                        .to_string(),
                });
            };
            let e_table = quote_ident(engine, &entity.table)?;
            let e_col = quote_ident(engine, &entity.column)?;
            let left = quote_ident(engine, left_col)?;
            let right = quote_ident(engine, right_col)?;
            (
                Some(format!("e.{e_col} AS entity_key")),
                format!("\nJOIN {e_table} e ON f.{left} = e.{right}"),
            )
        }
        Some(entity) => {
            let e_col = quote_ident(engine, &entity.column)?;
            (Some(format!("f.{e_col} AS entity_key")), String::new())
        }
        None => (None, String::new()),
    };

    let sql = match entity_select {
        Some(entity_select) if plan.entity_scope == EntityScope::TopN => {
            let n = plan.n.unwrap_or(5);
            format!(
                "WITH base AS (\n\
                 SELECT {period_expr} AS period_start,\n\
                 {entity_select},\n\
                 {value_expr} AS metric_value\n\
                 FROM {m_table} f{join_clause}\n\
                 GROUP BY 1, 2\n\
                 ),\n\
                 top_entities AS (\n\
                 SELECT entity_key\n\
                 FROM base\n\
                 GROUP BY entity_key\n\
                 ORDER BY SUM(metric_value) DESC\n\
                 LIMIT {n}\n\
                 )\n\
                 SELECT b.period_start, b.entity_key, ROUND(SUM(b.metric_value), 4) AS metric_value\n\
                 FROM base b\n\
                 JOIN top_entities t ON t.entity_key = b.entity_key\n\
                 GROUP BY 1, 2\n\
                 ORDER BY 1, 3 DESC"
            )
        }
        _ => format!(
            "SELECT {period_expr} AS period_start,\n\
             ROUND({value_expr}, 4) AS metric_value\n\
             FROM {m_table} f\n\
             GROUP BY 1\n\
             ORDER BY 1"
        ),
    };

    Ok(BuildOutcome::Ok { sql })
}
