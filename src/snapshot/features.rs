//! Snapshot payload computation over a live adapter.
//!
//! Builds the deterministic trend/segmentation SQL, runs it through the
//! guardrail and the adapter, and reduces the rows to the stored payload: a
//! least-squares trend fit for trend snapshots, an RFM summary for
//! segmentation snapshots.

use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{DatabaseAdapter, Row};
use crate::builder::{self, BuildOutcome};
use crate::config::LimitSettings;
use crate::error::HeronError;
use crate::guardrail;
use crate::plan::{CompareAgainst, EntityScope, Intent, Plan, TaskType};
use crate::schema::SchemaMetadata;
use crate::sql::TimeGrain;

use super::{SnapshotCompute, SnapshotType};

/// Snapshot rollups may scan more periods/entities than interactive queries.
const SNAPSHOT_ROW_LIMIT: u32 = 10_000;

pub struct FeatureCompute {
    adapter: Box<dyn DatabaseAdapter>,
    metadata: SchemaMetadata,
    row_limit: u32,
    timeout_ms: u64,
}

impl FeatureCompute {
    pub fn new(adapter: Box<dyn DatabaseAdapter>, metadata: SchemaMetadata) -> Self {
        Self {
            adapter,
            metadata,
            row_limit: SNAPSHOT_ROW_LIMIT,
            timeout_ms: LimitSettings::default().timeout_ms,
        }
    }

    pub fn with_limits(mut self, row_limit: u32, timeout_ms: u64) -> Self {
        self.row_limit = row_limit;
        self.timeout_ms = timeout_ms;
        self
    }

    fn run_built_sql(&self, plan: &Plan) -> Result<BuiltRows, HeronError> {
        let outcome = builder::build(plan, &self.metadata, self.adapter.engine())?;
        match outcome {
            BuildOutcome::Ok { sql } => {
                let sql = guardrail::validate(&sql)?;
                debug!(task = plan.task_type.as_str(), "running snapshot query");
                let rows = self
                    .adapter
                    .execute_select(&sql, self.row_limit, self.timeout_ms)?;
                Ok(BuiltRows::Rows(rows))
            }
            BuildOutcome::InsufficientData { reason }
            | BuildOutcome::UnsupportedTask { reason } => Ok(BuiltRows::Unavailable(reason)),
        }
    }
}

enum BuiltRows {
    Rows(Vec<Row>),
    Unavailable(String),
}

impl SnapshotCompute for FeatureCompute {
    fn compute(
        &self,
        snapshot_type: SnapshotType,
        _dataset_id: Option<&str>,
        plan: Option<&Plan>,
    ) -> Result<(Value, Option<NaiveDate>), HeronError> {
        let default_plan;
        let plan = match plan {
            Some(plan) => plan,
            None => {
                default_plan = default_plan_for(snapshot_type);
                &default_plan
            }
        };

        let payload = match self.run_built_sql(plan)? {
            BuiltRows::Unavailable(reason) => {
                json!({"status": "insufficient_data", "reason": reason})
            }
            BuiltRows::Rows(rows) => match snapshot_type {
                SnapshotType::TrendAnalysis => trend_payload(&rows),
                SnapshotType::CustomerSegmentation => segmentation_payload(&rows),
            },
        };
        let source_max_date = self.source_max_date(_dataset_id)?;
        Ok((payload, source_max_date))
    }

    fn source_max_date(&self, _dataset_id: Option<&str>) -> Result<Option<NaiveDate>, HeronError> {
        let Some(time_col) =
            builder::find_candidate(&self.metadata.time_columns, None, builder::TIME_FALLBACK)
        else {
            return Ok(None);
        };
        let engine = self.adapter.engine();
        let table = builder::quote_ident(engine, &time_col.table)?;
        let column = builder::quote_ident(engine, &time_col.column)?;
        let sql = format!("SELECT MAX({column}) AS max_event_date FROM {table}");
        let rows = self.adapter.execute_select(&sql, 1, self.timeout_ms)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("max_event_date"))
            .and_then(value_as_date))
    }
}

fn default_plan_for(snapshot_type: SnapshotType) -> Plan {
    match snapshot_type {
        SnapshotType::TrendAnalysis => Plan {
            question: String::new(),
            intent: Intent::TrendAnalysis,
            planner_source: "snapshot".to_string(),
            requires_mining: true,
            task_type: TaskType::TrendAnalysis,
            entity_scope: EntityScope::All,
            entity_dimension: None,
            n: None,
            metric: None,
            time_grain: Some(TimeGrain::Month),
            compare_against: CompareAgainst::None,
        },
        SnapshotType::CustomerSegmentation => Plan {
            question: String::new(),
            intent: Intent::CustomerSegmentation,
            planner_source: "snapshot".to_string(),
            requires_mining: true,
            task_type: TaskType::Segmentation,
            entity_scope: EntityScope::All,
            entity_dimension: None,
            n: None,
            metric: None,
            time_grain: None,
            compare_against: CompareAgainst::None,
        },
    }
}

/// Fit `y = slope * x + intercept` over the per-period values and describe
/// the direction. Needs at least two periods.
fn trend_payload(rows: &[Row]) -> Value {
    let series: Vec<(String, f64)> = rows
        .iter()
        .filter_map(|row| {
            let period = row.get("period_start").map(value_as_string)?;
            let value = row.get("metric_value").and_then(value_as_f64)?;
            Some((period, value))
        })
        .collect();

    if series.len() < 2 {
        return json!({
            "series": series_json(&series),
            "trend": {
                "status": "insufficient_data",
                "reason": "Need at least two periods to compute trend",
                "points": series.len(),
            },
        });
    }

    let n = series.len() as f64;
    let mean_x = (series.len() - 1) as f64 / 2.0;
    let mean_y = series.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, (_, y)) in series.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, (_, y)) in series.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted) * (y - predicted);
        ss_tot += (y - mean_y) * (y - mean_y);
    }
    let r2 = if ss_tot == 0.0 { 0.0 } else { 1.0 - ss_res / ss_tot };

    let direction = if slope > 1e-9 {
        "upward"
    } else if slope < -1e-9 {
        "downward"
    } else {
        "flat"
    };

    json!({
        "series": series_json(&series),
        "trend": {
            "status": "ok",
            "points": series.len(),
            "slope_per_period": round4(slope),
            "intercept": round4(intercept),
            "r2": round4(r2),
            "direction": direction,
            "start_period": series[0].0,
            "end_period": series[series.len() - 1].0,
            "start_value": round4(series[0].1),
            "end_value": round4(series[series.len() - 1].1),
        },
    })
}

fn series_json(series: &[(String, f64)]) -> Value {
    Value::Array(
        series
            .iter()
            .map(|(period, value)| json!({"period_start": period, "metric_value": value}))
            .collect(),
    )
}

/// Reduce per-entity rollup rows to an RFM summary. Engines without native
/// date subtraction return `latest_event_date` instead of `recency_days`;
/// recency is derived here against the newest date in the result.
fn segmentation_payload(rows: &[Row]) -> Value {
    if rows.is_empty() {
        return json!({"rfm_summary": {"status": "insufficient_data", "customers": 0}});
    }

    let recencies = recency_days(rows);
    let frequencies: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get("frequency").and_then(value_as_f64))
        .collect();
    let monies: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get("monetary").and_then(value_as_f64))
        .collect();

    let mut summary = json!({
        "status": "ok",
        "customers": rows.len(),
        "frequency_min": min_of(&frequencies),
        "frequency_max": max_of(&frequencies),
        "monetary_min": round4(min_of(&monies)),
        "monetary_max": round4(max_of(&monies)),
        "monetary_total": round4(monies.iter().sum()),
    });
    if !recencies.is_empty() {
        summary["recency_min"] = json!(min_of(&recencies));
        summary["recency_max"] = json!(max_of(&recencies));
    }

    json!({"rfm_summary": summary})
}

fn recency_days(rows: &[Row]) -> Vec<f64> {
    let direct: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.get("recency_days").and_then(value_as_f64))
        .collect();
    if !direct.is_empty() {
        return direct;
    }

    let dates: Vec<NaiveDate> = rows
        .iter()
        .filter_map(|r| r.get("latest_event_date").and_then(value_as_date))
        .collect();
    let Some(reference) = dates.iter().max().copied() else {
        return Vec::new();
    };
    dates
        .iter()
        .map(|d| (reference - *d).num_days() as f64)
        .collect()
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts `YYYY-MM-DD` with an optional time suffix, which is what the
/// engines hand back for date and timestamp columns in text form.
fn value_as_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    let prefix = text.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}
