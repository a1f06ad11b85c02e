//! Engine and connection pool settings.
//!
//! ```rust,ignore
//! use resourcecrate::config::PoolConfig;
//!
//! // DATABASE_URL=postgres://... DATABASE_MAX_CONNECTIONS=20
//! let db = PoolConfig::from_env()?.connect().await?;
//! ```

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidEnv { var: &'static str, value: String },
}

/// List limits applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Page size when the request names none
    pub default_limit: u64,
    /// Upper bound every requested page size is clamped to
    pub max_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Clamp a requested page size into `[1, max_limit]`
    #[must_use]
    pub fn effective_limit(&self, requested: Option<u64>) -> u64 {
        let max = self.max_limit.max(1);
        requested.unwrap_or(self.default_limit).clamp(1, max)
    }
}

/// Connection pool settings for the SQL repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long to wait for a free connection before the attempt counts as failed
    pub acquire_timeout_ms: u64,
    /// Extra acquisition attempts per operation before reporting `Unavailable`
    pub acquire_retries: u32,
    pub sqlx_logging: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_ms: 5000,
            acquire_retries: 2,
            sqlx_logging: false,
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` and
    /// `DATABASE_ACQUIRE_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidEnv` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = env::var("DATABASE_URL") {
            config.url = url;
        }
        if let Some(max) = parse_env("DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(timeout) = parse_env("DATABASE_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout_ms = timeout;
        }
        Ok(config)
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new(self.url.clone());
        opts.max_connections(self.max_connections.max(1))
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout())
            .sqlx_logging(self.sqlx_logging);
        opts
    }

    /// Open the pool.
    ///
    /// # Errors
    ///
    /// Whatever Sea-ORM reports when the database cannot be reached.
    pub async fn connect(&self) -> Result<DatabaseConnection, DbErr> {
        tracing::debug!(
            max_connections = self.max_connections,
            acquire_timeout_ms = self.acquire_timeout_ms,
            "connecting database pool"
        );
        Database::connect(self.connect_options()).await
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}
