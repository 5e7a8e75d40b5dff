//! Segmentation SQL construction.
//!
//! Produces a per-entity rollup of latest activity date, event frequency,
//! and summed monetary value. Engines that can subtract dates natively also
//! get recency in days against the most recent activity across all entities;
//! the others return the raw rollup and leave recency to the caller.

use crate::plan::Plan;
use crate::schema::SchemaMetadata;
use crate::sql::{Engine, SqlDialect};

use super::{find_candidate, quote_ident, BuildError, BuildOutcome, MEASURE_FALLBACK, TIME_FALLBACK};

const ENTITY_FALLBACK: &[&str] = &[
    "customer", "account", "user", "student", "country", "product", "name", "id",
];

pub(crate) fn build(
    plan: &Plan,
    metadata: &SchemaMetadata,
    engine: Engine,
) -> Result<BuildOutcome, BuildError> {
    let measure = find_candidate(&metadata.measures, plan.metric.as_deref(), MEASURE_FALLBACK);
    let time_col = find_candidate(&metadata.time_columns, None, TIME_FALLBACK);
    let entity = find_candidate(
        &metadata.entities,
        plan.entity_dimension.as_deref(),
        ENTITY_FALLBACK,
    );
    let (Some(measure), Some(time_col), Some(entity)) = (measure, time_col, entity) else {
        return Ok(BuildOutcome::InsufficientData {
            reason: "No suitable entity/measure/time columns found in schema metadata."
                .to_string(),
        });
    };

    if measure.table != time_col.table {
        return Ok(BuildOutcome::InsufficientData {
            reason: "Measure and time columns are on different tables; segmentation join \
                     inference unavailable."
                .to_string(),
        });
    }

    let m_table = quote_ident(engine, &measure.table)?;
    let m_col = quote_ident(engine, &measure.column)?;
    let t_col = quote_ident(engine, &time_col.column)?;
    let e_col = quote_ident(engine, &entity.column)?;

    let (entity_expr, join_clause) = if entity.table != measure.table {
        let Some((left_col, right_col)) = metadata.find_relationship(&measure.table, &entity.table)
        else {
            return Ok(BuildOutcome::InsufficientData {
                reason: "Entity relationship to measure table was not found for segmentation."
                    .to_string(),
            });
        };
        let e_table = quote_ident(engine, &entity.table)?;
        let left = quote_ident(engine, left_col)?;
        let right = quote_ident(engine, right_col)?;
        (
            format!("e.{e_col}"),
            format!("\nJOIN {e_table} e ON f.{left} = e.{right}"),
        )
    } else {
        (format!("f.{e_col}"), String::new())
    };

    let sql = if engine.supports_date_subtraction() {
        format!(
            "WITH entity_rollup AS (\n\
             SELECT\n\
             {entity_expr} AS entity_id,\n\
             (MAX(f.{t_col})::date) AS latest_event_date,\n\
             COUNT(*)::int AS frequency,\n\
             ROUND(SUM(f.{m_col}), 4) AS monetary\n\
             FROM {m_table} f{join_clause}\n\
             GROUP BY 1\n\
             ),\n\
             ref AS (\n\
             SELECT MAX(latest_event_date) AS ref_date FROM entity_rollup\n\
             )\n\
             SELECT\n\
             er.entity_id,\n\
             (ref.ref_date - er.latest_event_date)::int AS recency_days,\n\
             er.frequency,\n\
             er.monetary\n\
             FROM entity_rollup er\n\
             CROSS JOIN ref\n\
             ORDER BY er.entity_id"
        )
    } else {
        format!(
            "SELECT\n\
             {entity_expr} AS entity_id,\n\
             MAX(f.{t_col}) AS latest_event_date,\n\
             COUNT(*) AS frequency,\n\
             ROUND(SUM(f.{m_col}), 4) AS monetary\n\
             FROM {m_table} f{join_clause}\n\
             GROUP BY 1\n\
             ORDER BY 1"
        )
    };

    Ok(BuildOutcome::Ok { sql })
}
