//! SQLite SQL dialect.
//!
//! SQLite has no `date_trunc`; buckets are built by formatting the value
//! down to the first day of the period and reparsing with `date(...)`.
//! Week and quarter have no strftime pattern, so they collapse to month.

use super::helpers;
use super::{SqlDialect, TimeGrain};

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn render_date_bucket(&self, column_expr: &str, grain: Option<&str>) -> String {
        match grain.and_then(TimeGrain::from_str) {
            Some(TimeGrain::Year) => {
                format!("date(strftime('%Y-01-01', {column_expr}))")
            }
            Some(TimeGrain::Day) => format!("date({column_expr})"),
            _ => format!("date(strftime('%Y-%m-01', {column_expr}))"),
        }
    }

    fn limit_placeholder(&self) -> &'static str {
        "?"
    }
}
