//! MySQL SQL dialect.
//!
//! Date bucketing formats the value down to the first day of the period with
//! `date_format` and reparses it with `str_to_date`. Week and quarter have
//! no format pattern, so they collapse to month.

use super::helpers;
use super::{SqlDialect, TimeGrain};

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn render_date_bucket(&self, column_expr: &str, grain: Option<&str>) -> String {
        match grain.and_then(TimeGrain::from_str) {
            Some(TimeGrain::Year) => format!(
                "str_to_date(concat(year({column_expr}), '-01-01'), '%Y-%m-%d')"
            ),
            Some(TimeGrain::Day) => format!("date({column_expr})"),
            _ => format!(
                "str_to_date(date_format({column_expr}, '%Y-%m-01'), '%Y-%m-%d')"
            ),
        }
    }

    fn limit_placeholder(&self) -> &'static str {
        "?"
    }
}
