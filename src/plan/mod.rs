//! Structured analytics plan.
//!
//! A [`Plan`] is the normalized output of an external planner: a fixed
//! vocabulary of intents, task types, and scoping fields that the builder
//! and orchestrator consume. [`normalize`] is the consumer-side coercion of
//! raw planner JSON into that vocabulary; planners are free to be sloppy,
//! the plan is not.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql::TimeGrain;
use crate::store::hash::compute_hash;

/// Scope key used for snapshots that are not tied to any plan.
pub const DEFAULT_SCOPE_KEY: &str = "__default__";

static TOP_N: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btop\s+(\d+)\b").expect("valid regex"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("planner returned invalid intent: {0:?}")]
    InvalidIntent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CountryRevenue,
    TopCustomers,
    TopProducts,
    MonthlyRevenue,
    TrendAnalysis,
    CustomerSegmentation,
    GenericSalesSummary,
}

impl Intent {
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "country_revenue" => Some(Self::CountryRevenue),
            "top_customers" => Some(Self::TopCustomers),
            "top_products" => Some(Self::TopProducts),
            "monthly_revenue" => Some(Self::MonthlyRevenue),
            "trend_analysis" => Some(Self::TrendAnalysis),
            "customer_segmentation" => Some(Self::CustomerSegmentation),
            "generic_sales_summary" => Some(Self::GenericSalesSummary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SqlRetrieval,
    TrendAnalysis,
    Segmentation,
}

impl TaskType {
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "sql_retrieval" => Some(Self::SqlRetrieval),
            "trend_analysis" => Some(Self::TrendAnalysis),
            "segmentation" => Some(Self::Segmentation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlRetrieval => "sql_retrieval",
            Self::TrendAnalysis => "trend_analysis",
            Self::Segmentation => "segmentation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityScope {
    All,
    TopN,
}

impl EntityScope {
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "all" => Some(Self::All),
            "top_n" => Some(Self::TopN),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::TopN => "top_n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareAgainst {
    None,
    Global,
    PreviousPeriod,
}

impl CompareAgainst {
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "global" => Some(Self::Global),
            "previous_period" => Some(Self::PreviousPeriod),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Global => "global",
            Self::PreviousPeriod => "previous_period",
        }
    }
}

/// Normalized analytics plan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub question: String,
    pub intent: Intent,
    pub planner_source: String,
    pub requires_mining: bool,
    pub task_type: TaskType,
    pub entity_scope: EntityScope,
    pub entity_dimension: Option<String>,
    pub n: Option<u32>,
    pub metric: Option<String>,
    pub time_grain: Option<TimeGrain>,
    pub compare_against: CompareAgainst,
}

impl Plan {
    /// SHA-256 over the plan's canonical JSON. Two plans with equal field
    /// values produce the same signature regardless of construction order.
    pub fn signature(&self) -> Result<String, serde_json::Error> {
        compute_hash(self)
    }

    /// Deterministic key over the scoping fields, used to shard snapshots.
    pub fn scope_key(&self) -> String {
        let dim = self.entity_dimension.as_deref().unwrap_or("-");
        let n = self.n.map_or_else(|| "-".to_string(), |n| n.to_string());
        let metric = self.metric.as_deref().unwrap_or("-");
        let grain = self.time_grain.map_or("-", |g| g.as_str());
        format!(
            "scope={}|dim={}|n={}|metric={}|grain={}|cmp={}",
            self.entity_scope.as_str(),
            dim,
            n,
            metric,
            grain,
            self.compare_against.as_str()
        )
    }
}

fn infer_top_n(question: &str) -> Option<u32> {
    TOP_N
        .captures(&question.to_lowercase())
        .and_then(|cap| cap[1].parse().ok())
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    let trimmed = value?.as_str()?.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Coerce raw planner JSON into a [`Plan`].
///
/// An intent outside the fixed vocabulary is a hard error. Everything else
/// is coerced:
/// - a missing or unrecognized `task_type` is derived from the intent,
///   defaulting to `sql_retrieval`;
/// - an unrecognized `entity_scope` becomes `top_n` when the question
///   mentions "top <n>", otherwise `all`;
/// - `top_n` scope without a usable `n` infers it from the question,
///   defaulting to 5;
/// - an unrecognized `time_grain` becomes `month` for trend tasks and is
///   dropped otherwise;
/// - an unrecognized `compare_against` becomes `global` for trend tasks and
///   `none` otherwise.
pub fn normalize(parsed: &Value, question: &str) -> Result<Plan, PlanError> {
    let intent_raw = parsed
        .get("intent")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let intent =
        Intent::from_str(intent_raw).ok_or_else(|| PlanError::InvalidIntent(intent_raw.into()))?;

    let requires_mining = parsed
        .get("requires_mining")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let task_raw = parsed
        .get("task_type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let task_type = TaskType::from_str(task_raw).unwrap_or(match intent {
        Intent::TrendAnalysis => TaskType::TrendAnalysis,
        Intent::CustomerSegmentation => TaskType::Segmentation,
        _ => TaskType::SqlRetrieval,
    });

    let scope_raw = parsed
        .get("entity_scope")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let entity_scope = if scope_raw.is_empty() {
        EntityScope::All
    } else {
        EntityScope::from_str(scope_raw).unwrap_or_else(|| {
            if infer_top_n(question).is_some() {
                EntityScope::TopN
            } else {
                EntityScope::All
            }
        })
    };

    let mut n: Option<u32> = match parsed.get("n") {
        Some(Value::Number(num)) => num.as_i64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    if entity_scope == EntityScope::TopN && n.map_or(true, |v| v == 0) {
        n = Some(infer_top_n(question).unwrap_or(5));
    }

    let metric = opt_string(parsed.get("metric"));
    let entity_dimension = opt_string(parsed.get("entity_dimension"));

    let time_grain = opt_string(parsed.get("time_grain"))
        .and_then(|raw| TimeGrain::from_str(&raw.to_lowercase()))
        .or(if task_type == TaskType::TrendAnalysis {
            Some(TimeGrain::Month)
        } else {
            None
        });

    let compare_against = opt_string(parsed.get("compare_against"))
        .and_then(|raw| CompareAgainst::from_str(&raw.to_lowercase()))
        .unwrap_or(if task_type == TaskType::TrendAnalysis {
            CompareAgainst::Global
        } else {
            CompareAgainst::None
        });

    Ok(Plan {
        question: question.to_string(),
        intent,
        planner_source: "external".to_string(),
        requires_mining,
        task_type,
        entity_scope,
        entity_dimension,
        n,
        metric,
        time_grain,
        compare_against,
    })
}
