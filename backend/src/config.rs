//! Configuration management for the salon stock server
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with SALON_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub storage: StorageConfig,

    pub reconciler: ReconcilerConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Only required by the postgres backend.
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    pub acquire_timeout_secs: u64,
}

/// Which Ledger Store implementation backs the server
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerConfig {
    /// Retries after a concurrency conflict, not counting the first attempt
    pub max_retries: u32,

    pub retry_initial_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// How long to wait for the per-product lock
    pub lock_timeout_ms: u64,

    /// Deadline for a single attempt, lock wait included
    pub operation_timeout_ms: u64,

    /// Transaction dates further than this from now are rejected
    pub max_date_distance_days: i64,
}

impl ReconcilerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_initial_delay_ms: 50,
            retry_max_delay_ms: 1_000,
            lock_timeout_ms: 5_000,
            operation_timeout_ms: 15_000,
            max_date_distance_days: 3_650,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("SALON_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("storage.backend", "postgres")?
            .set_default("reconciler.max_retries", 3)?
            .set_default("reconciler.retry_initial_delay_ms", 50)?
            .set_default("reconciler.retry_max_delay_ms", 1_000)?
            .set_default("reconciler.lock_timeout_ms", 5_000)?
            .set_default("reconciler.operation_timeout_ms", 15_000)?
            .set_default("reconciler.max_date_distance_days", 3_650)?
            .set_default("logging.format", "pretty")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (SALON_ prefix)
            .add_source(
                Environment::with_prefix("SALON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> AppResult<()> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.trim().is_empty() {
            return Err(AppError::Configuration(
                "database.url is required for the postgres storage backend".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(AppError::Configuration(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::Configuration(
                "database.min_connections exceeds database.max_connections".to_string(),
            ));
        }

        let reconciler = &self.reconciler;
        if reconciler.lock_timeout_ms == 0 || reconciler.operation_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "reconciler timeouts must be greater than zero".to_string(),
            ));
        }
        if reconciler.retry_initial_delay_ms > reconciler.retry_max_delay_ms {
            return Err(AppError::Configuration(
                "reconciler.retry_initial_delay_ms exceeds retry_max_delay_ms".to_string(),
            ));
        }
        if reconciler.max_date_distance_days <= 0 {
            return Err(AppError::Configuration(
                "reconciler.max_date_distance_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
