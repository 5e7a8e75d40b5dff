//! PostgreSQL SQL dialect.
//!
//! Date bucketing uses native `date_trunc`, cast back to a plain date.
//! An unrecognized grain falls back to month rather than erroring, since
//! `date_trunc` would otherwise reject the literal at execution time.

use super::helpers;
use super::{SqlDialect, TimeGrain};

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn render_date_bucket(&self, column_expr: &str, grain: Option<&str>) -> String {
        let grain = grain
            .and_then(TimeGrain::from_str)
            .unwrap_or(TimeGrain::Month);
        format!("date_trunc('{}', {})::date", grain.as_str(), column_expr)
    }

    fn limit_placeholder(&self) -> &'static str {
        "$1"
    }

    fn supports_date_subtraction(&self) -> bool {
        true
    }
}
