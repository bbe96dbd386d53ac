use std::path::PathBuf;

use atlas_core::EngineConfig;
use chrono::NaiveDate;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub window: WindowConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
}

/// Where daily frames come from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Clickhouse,
    Snapshot,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// JSON file `{"frames": {"YYYY-MM-DD": [...]}}`, required for `snapshot`
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Upper bound on tickers fetched per day
    pub max_entities: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    pub lookback_days: usize,
    /// Last day of the window; today (UTC) when unset
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached frames
    pub max_capacity: u64,
    /// TTL for cached frames in seconds
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 64,
            ttl_seconds: 3600,
        }
    }
}

/// Shape of the written artifact
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLayout {
    /// `{"data": [record, ...]}`
    Flat,
    /// `{"frames": [{"date": ..., "entities": [...]}, ...]}`
    ByDate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub layout: ArtifactLayout,
    /// Decimal places kept for x and y
    pub decimals: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::defaults()?
            // Load from config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables
            // ATLAS__DATABASE__URL, ATLAS__ENGINE__TARGET_RADIUS, etc.
            .add_source(
                Environment::with_prefix("ATLAS")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.aligner.anchors")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            // Store defaults
            .set_default("store.kind", "clickhouse")?
            // Database defaults
            .set_default("database.url", "http://localhost:8123")?
            .set_default("database.database", "atlas")?
            .set_default("database.max_entities", 1000)?
            // Window defaults
            .set_default("window.lookback_days", 20)?
            // Retry defaults
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.initial_backoff_ms", 1000)?
            .set_default("retry.max_backoff_ms", 5000)?
            // Cache defaults
            .set_default("cache.max_capacity", 64)?
            .set_default("cache.ttl_seconds", 3600)?
            // Output defaults
            .set_default("output.path", "public/data/market_physics_history.json")?
            .set_default("output.layout", "flat")?
            .set_default("output.decimals", 2)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.kind == StoreKind::Snapshot && self.store.snapshot_path.is_none() {
            return Err(ConfigError::Message(
                "store.snapshot_path is required when store.kind = snapshot".to_string(),
            ));
        }
        if self.window.lookback_days == 0 {
            return Err(ConfigError::Message(
                "window.lookback_days must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Last day of the lookback window
    pub fn end_date(&self) -> NaiveDate {
        self.window
            .end_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}
