//! Eventide configuration
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! environment overrides. `Config::validate` enforces the numeric ranges and
//! the production secret requirement before anything else starts.

use eventide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(Error::ConfigValidation(format!(
                "Unknown environment: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// API key required in staging/production; absent is fatal there.
    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub features: FeatureFlags,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            secret_key: None,
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            analytics: AnalyticsConfig::default(),
            api: ApiConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path or `sqlite::memory:` for ephemeral stores.
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_max_overflow")]
    pub max_overflow: u32,

    #[serde(default = "default_pool_timeout_seconds")]
    pub pool_timeout_seconds: u64,

    #[serde(default = "default_pool_recycle_seconds")]
    pub pool_recycle_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
            pool_timeout_seconds: default_pool_timeout_seconds(),
            pool_recycle_seconds: default_pool_recycle_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache endpoint; in-process when absent.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_cache_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_cache_socket_timeout_seconds")]
    pub socket_timeout_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_cache_max_connections(),
            socket_timeout_seconds: default_cache_socket_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Events handed to the store per flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between forced tracker flushes.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,

    /// Inactivity timeout before the janitor closes a session.
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,

    /// Raw-event retention horizon.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Bound on the tracker's in-memory queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            session_timeout_seconds: default_session_timeout_seconds(),
            retention_days: default_retention_days(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Events per minute accepted from one client.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub ab_testing: bool,
    #[serde(default)]
    pub session_replay: bool,
    #[serde(default)]
    pub heatmaps: bool,
    #[serde(default)]
    pub predictive: bool,
    #[serde(default)]
    pub custom_dashboards: bool,
    #[serde(default)]
    pub data_export: bool,
}

impl Config {
    /// Load configuration: defaults, overlaid by `path` when given, then by
    /// `EVENTIDE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(env) = std::env::var("EVENTIDE_ENVIRONMENT")
            && let Ok(parsed) = env.parse()
        {
            self.environment = parsed;
        }
        if let Ok(key) = std::env::var("EVENTIDE_SECRET_KEY") {
            self.secret_key = Some(key);
        }
        if let Ok(url) = std::env::var("EVENTIDE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(url) = std::env::var("EVENTIDE_CACHE_URL") {
            self.cache.url = Some(url);
        }
        if let Ok(size) = std::env::var("EVENTIDE_BATCH_SIZE")
            && let Ok(parsed) = size.parse()
        {
            self.analytics.batch_size = parsed;
        }
        if let Ok(limit) = std::env::var("EVENTIDE_RATE_LIMIT")
            && let Ok(parsed) = limit.parse()
        {
            self.api.rate_limit = parsed;
        }
    }

    /// Enforce numeric ranges and the production secret requirement.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.database.pool_size) {
            return Err(Error::ConfigValidation(format!(
                "database.pool_size must be in 1..=100, got {}",
                self.database.pool_size
            )));
        }
        if self.database.max_overflow > 50 {
            return Err(Error::ConfigValidation(format!(
                "database.max_overflow must be in 0..=50, got {}",
                self.database.max_overflow
            )));
        }
        if !(1..=10_000).contains(&self.analytics.batch_size) {
            return Err(Error::ConfigValidation(format!(
                "analytics.batch_size must be in 1..=10000, got {}",
                self.analytics.batch_size
            )));
        }
        if self.analytics.flush_interval_seconds == 0 {
            return Err(Error::ConfigValidation(
                "analytics.flush_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.analytics.session_timeout_seconds == 0 {
            return Err(Error::ConfigValidation(
                "analytics.session_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.api.rate_limit == 0 {
            return Err(Error::ConfigValidation(
                "api.rate_limit must be at least 1".to_string(),
            ));
        }

        // Missing secrets are a startup failure outside development
        if self.environment != Environment::Development && self.secret_key.is_none() {
            return Err(Error::ConfigValidation(format!(
                "secret_key is required in {:?}",
                self.environment
            )));
        }

        Ok(())
    }
}

fn default_environment() -> Environment {
    Environment::Development
}

fn default_database_url() -> String {
    "sqlite://eventide.db".to_string()
}

fn default_pool_size() -> u32 {
    20
}

fn default_max_overflow() -> u32 {
    10
}

fn default_pool_timeout_seconds() -> u64 {
    30
}

fn default_pool_recycle_seconds() -> u64 {
    3600
}

fn default_cache_max_connections() -> u32 {
    50
}

fn default_cache_socket_timeout_seconds() -> u64 {
    5
}

fn default_batch_size() -> usize {
    1000
}

fn default_flush_interval_seconds() -> u64 {
    5
}

fn default_session_timeout_seconds() -> u64 {
    1800
}

fn default_retention_days() -> u32 {
    90
}

fn default_queue_capacity() -> usize {
    100_000
}

fn default_rate_limit() -> u64 {
    100
}
