//! SQL dialect definitions for the supported engines.
//!
//! Each engine implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (Postgres/SQLite), `` ` `` (MySQL)
//! - Date bucketing: `date_trunc` (Postgres) vs string-format-and-reparse
//!   (MySQL, SQLite)
//! - Row-limit placeholder: `$1` (Postgres) vs `?` (MySQL, SQLite)
//!
//! Everything here is pure string rendering; no engine-specific behavior
//! leaks past this module.

pub mod helpers;
mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;

use serde::{Deserialize, Serialize};

/// Time grain for date bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    /// Parse a grain from its lowercase name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" => Some(TimeGrain::Day),
            "week" => Some(TimeGrain::Week),
            "month" => Some(TimeGrain::Month),
            "quarter" => Some(TimeGrain::Quarter),
            "year" => Some(TimeGrain::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

/// SQL dialect trait - defines how engine-specific fragments are rendered.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Render `column_expr` truncated to the given grain as a date expression.
    ///
    /// `grain` is the raw string from a plan; an unrecognized value falls
    /// back to the engine's default bucketing (month).
    fn render_date_bucket(&self, column_expr: &str, grain: Option<&str>) -> String;

    /// Positional parameter marker used when binding a row-limit value.
    fn limit_placeholder(&self) -> &'static str;

    /// Whether the engine can compute day differences between dates natively
    /// with plain subtraction (drives the segmentation recency rollup).
    fn supports_date_subtraction(&self) -> bool {
        false
    }
}

/// Supported execution engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    MySql,
    Sqlite,
}

impl Engine {
    /// Parse an engine from a configuration string.
    ///
    /// Accepts `postgres`/`postgresql`, `mysql`, and `sqlite`
    /// (case-insensitively). Anything else is rejected.
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Engine::Postgres),
            "mysql" => Some(Engine::MySql),
            "sqlite" => Some(Engine::Sqlite),
            _ => None,
        }
    }

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Engine::Postgres => &Postgres,
            Engine::MySql => &MySql,
            Engine::Sqlite => &Sqlite,
        }
    }
}

impl SqlDialect for Engine {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn render_date_bucket(&self, column_expr: &str, grain: Option<&str>) -> String {
        self.dialect().render_date_bucket(column_expr, grain)
    }

    fn limit_placeholder(&self) -> &'static str {
        self.dialect().limit_placeholder()
    }

    fn supports_date_subtraction(&self) -> bool {
        self.dialect().supports_date_subtraction()
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}
