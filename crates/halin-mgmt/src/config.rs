use std::path::Path;
use std::time::Duration;

use halin_advisor::AdvisorConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::FeedOptions;
use crate::query::{QueryDefinition, QueryDescriptor, QueryError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config file extension: {0}")]
    UnsupportedExtension(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HalinConfig {
    /// Address of the member discovery starts from.
    pub seed_address: String,
    pub database: String,
    pub observation_capacity: usize,
    pub event_log_capacity: usize,
    pub feed_window_secs: u64,
    pub feed_capacity: usize,
    pub default_rate_ms: i64,
    pub advisor: AdvisorConfig,
    /// Extra feeds started for every member once connected.
    pub feeds: Vec<QueryDefinition>,
}

impl Default for HalinConfig {
    fn default() -> Self {
        Self {
            seed_address: String::from("bolt://localhost:7687"),
            database: String::from("neo4j"),
            observation_capacity: 500,
            event_log_capacity: 200,
            feed_window_secs: 60,
            feed_capacity: 1000,
            default_rate_ms: 1000,
            advisor: AdvisorConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl HalinConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: HalinConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => return Err(ConfigError::UnsupportedExtension(ext.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_address.trim().is_empty() {
            return Err(ConfigError::Invalid("seed_address is empty".to_string()));
        }
        if self.observation_capacity == 0 {
            return Err(ConfigError::Invalid("observation_capacity must be positive".to_string()));
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::Invalid("event_log_capacity must be positive".to_string()));
        }
        if self.feed_window_secs == 0 {
            return Err(ConfigError::Invalid("feed_window_secs must be positive".to_string()));
        }
        if self.feed_capacity == 0 {
            return Err(ConfigError::Invalid("feed_capacity must be positive".to_string()));
        }
        if self.default_rate_ms < 0 {
            return Err(ConfigError::Invalid(format!(
                "default_rate_ms must not be negative, got {}",
                self.default_rate_ms
            )));
        }
        if self.advisor.tx_lag_error_threshold <= 0 {
            return Err(ConfigError::Invalid(
                "advisor.tx_lag_error_threshold must be positive".to_string(),
            ));
        }
        self.custom_feeds()?;
        Ok(())
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            window: Duration::from_secs(self.feed_window_secs),
            capacity: self.feed_capacity,
        }
    }

    /// Configured feeds, validated. Feeds without a rate use `default_rate_ms`.
    pub fn custom_feeds(&self) -> Result<Vec<QueryDescriptor>, QueryError> {
        self.feeds
            .iter()
            .cloned()
            .map(|mut definition| {
                definition.rate_ms = definition.rate_ms.or(Some(self.default_rate_ms));
                definition.build()
            })
            .collect()
    }
}
