//! Environment-driven application configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required |
//! | `DB_MAX_CONNECTIONS` | 10 |
//! | `DB_MIN_CONNECTIONS` | 1 |
//! | `DB_CONNECT_TIMEOUT_SECS` | 30 |
//! | `DB_IDLE_TIMEOUT_SECS` | 600 |
//! | `LOG_FORMAT` | `text` |
//! | `LOG_FILE` | unset (stdout only) |
//!
//! Binaries load `.env` with `dotenvy` before calling [`AppConfig::from_env`].

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::defaults;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for crate::Error {
    fn from(e: ConfigError) -> Self {
        crate::Error::Config(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: defaults::DB_MIN_CONNECTIONS,
            connect_timeout_secs: defaults::DB_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: defaults::DB_IDLE_TIMEOUT_SECS,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation(
                "DATABASE_URL cannot be empty".to_string(),
            ));
        }
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::Validation(
                "DATABASE_URL must use the postgres:// scheme".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Validation(format!(
                "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Directory and file prefix for daily-rotated logs.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> ConfigResult<T> {
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        _ => Ok(default),
    }
}

impl AppConfig {
    /// Load from process environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let database = DatabaseConfig {
            url,
            max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", defaults::DB_MAX_CONNECTIONS)?,
            min_connections: parse_var(&lookup, "DB_MIN_CONNECTIONS", defaults::DB_MIN_CONNECTIONS)?,
            connect_timeout_secs: parse_var(
                &lookup,
                "DB_CONNECT_TIMEOUT_SECS",
                defaults::DB_CONNECT_TIMEOUT_SECS,
            )?,
            idle_timeout_secs: parse_var(
                &lookup,
                "DB_IDLE_TIMEOUT_SECS",
                defaults::DB_IDLE_TIMEOUT_SECS,
            )?,
        };

        let logging = LoggingConfig {
            format: parse_var(&lookup, "LOG_FORMAT", LogFormat::Text)?,
            file: lookup("LOG_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        let config = Self {
            database,
            logging,
        };
        config.validate()?;

        debug!(
            subsystem = "config",
            max_connections = config.database.max_connections,
            log_format = %config.logging.format,
            "Loaded configuration from environment"
        );
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.database.validate()
    }
}
