//! History engine configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default lookback for `value_at` when searching earlier clocks (one day).
pub const DEFAULT_HISTORY_PERIOD_SECS: u64 = 86_400;

/// Maximum rows per multi-row INSERT statement.
pub const DEFAULT_MAX_INSERTS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SQL database URL (`sqlite:`, `mysql:` or `postgres:`)
    pub database_url: String,

    /// Value types served by the secondary document store. `None` = all SQL.
    #[serde(default)]
    pub secondary: Option<SecondaryStoreConfig>,

    /// Lookback horizon for `value_at`; 0 disables the bound
    pub history_period_secs: u64,

    /// Deadline for one backend partition of a read call
    pub partition_timeout_ms: u64,

    /// HTTP timeout for a single document store request
    pub store_timeout_ms: u64,

    /// Attempts for transient document store failures
    pub store_retry_attempts: u32,

    /// Rows per batched INSERT (housekeeper queue)
    pub max_inserts: usize,

    /// What a read does when one backend partition fails
    pub read_policy: ReadPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Secondary store routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryStoreConfig {
    /// Index names (`dbl`, `uint`, `str`, `text`, `log`) routed to the store
    pub types: Vec<String>,

    /// Base URL, either shared by all types or given per type
    #[serde(default)]
    pub url: Option<StoreUrl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreUrl {
    Single(String),
    PerType(HashMap<String, String>),
}

impl SecondaryStoreConfig {
    /// Base URL for one index name, normalized to end with `/`.
    pub fn url_for(&self, index: &str) -> Option<String> {
        let url = match self.url.as_ref()? {
            StoreUrl::Single(url) => url.clone(),
            StoreUrl::PerType(urls) => urls.get(index)?.clone(),
        };
        if url.ends_with('/') {
            Some(url)
        } else {
            Some(format!("{}/", url))
        }
    }
}

/// Failure handling for multi-backend reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Log the failed partition and return what the other backend produced
    #[default]
    Isolate,
    /// Fail the whole call
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `trendline_history=debug`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json: false,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("TRENDLINE_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite::memory:".to_string()),
            secondary: None,
            history_period_secs: DEFAULT_HISTORY_PERIOD_SECS,
            partition_timeout_ms: 30_000,
            store_timeout_ms: 10_000,
            store_retry_attempts: 2,
            max_inserts: DEFAULT_MAX_INSERTS,
            read_policy: ReadPolicy::Isolate,
            logging: LoggingConfig::default(),
        }
    }
}

impl HistoryConfig {
    /// Layer defaults, an optional config file and `TRENDLINE__*` variables.
    ///
    /// Nested keys use `__`, e.g. `TRENDLINE__SECONDARY__TYPES=uint,dbl`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&HistoryConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRENDLINE")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("secondary.types")
                .try_parsing(true),
        );

        let config: HistoryConfig = builder
            .build()
            .context("Build configuration")?
            .try_deserialize()
            .context("Deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("database_url must be set");
        }
        if self.partition_timeout_ms == 0 {
            anyhow::bail!("partition_timeout_ms must be greater than 0");
        }
        if self.store_timeout_ms == 0 {
            anyhow::bail!("store_timeout_ms must be greater than 0");
        }
        if self.store_retry_attempts == 0 {
            anyhow::bail!("store_retry_attempts must be at least 1");
        }
        if self.max_inserts == 0 {
            anyhow::bail!("max_inserts must be greater than 0");
        }
        Ok(())
    }

    /// Lookback for `value_at`, `None` when disabled.
    pub fn history_period(&self) -> Option<i64> {
        (self.history_period_secs > 0).then_some(self.history_period_secs as i64)
    }

    pub fn partition_timeout(&self) -> Duration {
        Duration::from_millis(self.partition_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
