//! Configuration-driven adapter construction.

use crate::config::{ConnectionSettings, SettingsError};
use crate::sql::Engine;

use super::{AdapterError, DatabaseAdapter, MySqlAdapter, PostgresAdapter, SqliteAdapter};

/// Build the adapter for the requested engine.
///
/// `engine` overrides the configured/environment engine when given. Missing
/// connection parameters fail here, before any connection attempt.
pub fn get_adapter(
    engine: Option<&str>,
    settings: &ConnectionSettings,
) -> Result<Box<dyn DatabaseAdapter>, AdapterError> {
    let engine = match engine {
        Some(raw) => Engine::from_config_str(raw)
            .ok_or_else(|| SettingsError::UnsupportedEngine(raw.to_string()))?,
        None => settings.resolved_engine()?,
    };

    match engine {
        Engine::Postgres => Ok(Box::new(PostgresAdapter::new(settings)?)),
        Engine::MySql => Ok(Box::new(MySqlAdapter::new(settings)?)),
        Engine::Sqlite => Ok(Box::new(SqliteAdapter::new(settings)?)),
    }
}
