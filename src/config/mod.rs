//! TOML-based configuration.
//!
//! Supports a config file (heron.toml) with environment variable expansion
//! and environment-variable fallbacks for connection parameters, so a bare
//! environment (DB_HOST, DB_USER, ...) works without any file at all.
//!
//! Example configuration:
//! ```toml
//! [connection]
//! engine = "postgres"
//! host = "localhost"
//! dbname = "analytics"
//! user = "analytics_ro"
//! password = "${DB_PASSWORD}"
//!
//! [limits]
//! row_limit = 100
//! timeout_ms = 15000
//! max_repairs = 2
//!
//! [snapshots]
//! ttl_hours = 24
//!
//! [store]
//! path = "heron.db"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sql::Engine;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(String),

    #[error("Missing connection parameter for {engine}: {parameter}")]
    MissingParameter {
        engine: &'static str,
        parameter: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Database connection parameters.
    pub connection: ConnectionSettings,

    /// Execution limits applied to every guarded query.
    pub limits: LimitSettings,

    /// Snapshot staleness configuration.
    pub snapshots: SnapshotSettings,

    /// Metadata store configuration.
    pub store: StoreSettings,
}

/// Connection configuration. Every string value supports `${ENV_VAR}`
/// expansion; a missing value falls back to the corresponding `DB_*`
/// environment variable.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Database engine: postgres, mysql, or sqlite.
    pub engine: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// SQLite database file path.
    pub db_path: Option<String>,
}

/// Resolved server connection parameters (Postgres and MySQL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl ConnectionSettings {
    fn resolved(&self, value: &Option<String>, env_key: &str) -> Result<Option<String>, SettingsError> {
        if let Some(raw) = value {
            let expanded = expand_env_vars(raw)?;
            if !expanded.trim().is_empty() {
                return Ok(Some(expanded));
            }
        }
        match env::var(env_key) {
            Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    fn resolved_port(&self, default: u16) -> Result<u16, SettingsError> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        match env::var("DB_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| SettingsError::InvalidConfig(format!("DB_PORT is not a port: {raw}"))),
            Err(_) => Ok(default),
        }
    }

    /// Resolve the configured engine, defaulting to postgres.
    pub fn resolved_engine(&self) -> Result<Engine, SettingsError> {
        let raw = match self.resolved(&self.engine, "DB_ENGINE")? {
            Some(v) => v,
            None => "postgres".to_string(),
        };
        Engine::from_config_str(&raw).ok_or(SettingsError::UnsupportedEngine(raw))
    }

    fn server_params(&self, engine: &'static str, default_port: u16) -> Result<ServerParams, SettingsError> {
        let missing = |parameter| SettingsError::MissingParameter { engine, parameter };
        Ok(ServerParams {
            host: self.resolved(&self.host, "DB_HOST")?.ok_or(missing("host"))?,
            port: self.resolved_port(default_port)?,
            dbname: self
                .resolved(&self.dbname, "DB_NAME")?
                .ok_or(missing("dbname"))?,
            user: self.resolved(&self.user, "DB_USER")?.ok_or(missing("user"))?,
            password: self
                .resolved(&self.password, "DB_PASSWORD")?
                .ok_or(missing("password"))?,
        })
    }

    /// Parameters for a Postgres connection. Fails fast when any required
    /// parameter is missing, before any connection attempt.
    pub fn postgres_params(&self) -> Result<ServerParams, SettingsError> {
        self.server_params("postgres", 5432)
    }

    /// Parameters for a MySQL connection.
    pub fn mysql_params(&self) -> Result<ServerParams, SettingsError> {
        self.server_params("mysql", 3306)
    }

    /// SQLite database file path.
    pub fn sqlite_path(&self) -> Result<PathBuf, SettingsError> {
        self.resolved(&self.db_path, "SQLITE_DB_PATH")?
            .map(PathBuf::from)
            .ok_or(SettingsError::MissingParameter {
                engine: "sqlite",
                parameter: "db_path",
            })
    }
}

/// Execution limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Maximum rows returned by a guarded query.
    pub row_limit: u32,

    /// Server-side statement timeout in milliseconds.
    pub timeout_ms: u64,

    /// Maximum repair attempts after the initial execution.
    pub max_repairs: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            row_limit: 100,
            timeout_ms: 15_000,
            max_repairs: 2,
        }
    }
}

/// Snapshot staleness configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Snapshot time-to-live in hours.
    pub ttl_hours: i64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite metadata store.
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "heron.db".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `HERON_CONFIG`
    /// 2. `./heron.toml`
    /// 3. Built-in defaults (connection parameters from `DB_*` variables)
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("HERON_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("heron.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next();
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                // $VAR (ends at non-alphanumeric/underscore)
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
