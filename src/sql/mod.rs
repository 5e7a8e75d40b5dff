//! SQL rendering concerns: per-engine dialect differences.

pub mod dialect;

pub use dialect::{Engine, SqlDialect, TimeGrain};
