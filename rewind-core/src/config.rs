//! Configuration types for Rewind

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, RewindError};
use crate::pricing::ModelPrice;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RewindConfig {
    /// Event store backend
    pub store: StoreConfig,

    /// Limits applied to list queries
    pub query: QueryLimits,

    /// Replay engine configuration
    pub replay: ReplayConfig,

    /// Pricing overrides, applied on top of the built-in table
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pricing: Vec<ModelPrice>,
}

/// Event store backend selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local store; history is lost on exit
    #[default]
    Memory,

    /// SurrealDB (requires the `store-surrealdb` feature)
    SurrealDb {
        /// Endpoint, e.g. `mem://` or `ws://localhost:8000`
        url: String,
        /// Namespace
        #[serde(default = "default_surreal_namespace")]
        namespace: String,
        /// Database
        #[serde(default = "default_surreal_database")]
        database: String,
    },
}

fn default_surreal_namespace() -> String {
    "rewind".to_string()
}

fn default_surreal_database() -> String {
    "events".to_string()
}

/// Result-size bounds for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Limit applied when a query does not set one
    pub default_limit: usize,

    /// Largest limit a caller may request; larger requests are clamped
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

impl QueryLimits {
    /// Resolve a requested limit against the bounds
    pub fn resolve(&self, requested: Option<usize>) -> Result<usize> {
        match requested {
            Some(0) => Err(RewindError::Validation(
                "limit must be greater than zero".to_string(),
            )),
            Some(n) => Ok(n.min(self.max_limit)),
            None => Ok(self.default_limit.min(self.max_limit)),
        }
    }
}

/// Replay engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum number of events a replay window may contain
    pub max_replay_events: usize,

    /// Deadline for a re-execution when the request does not set one
    #[serde(with = "humantime_serde")]
    pub reexecution_timeout: Duration,

    /// Concurrency used by batch replays
    pub max_concurrent_replays: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_replay_events: 5000,
            reexecution_timeout: Duration::from_secs(60),
            max_concurrent_replays: 4,
        }
    }
}

impl RewindConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `rewind.toml` in the working directory
    /// 3. The file named by `REWIND_CONFIG_PATH`, if set
    /// 4. `REWIND_`-prefixed environment variables (`__` separates nested keys,
    ///    e.g. `REWIND_QUERY__MAX_LIMIT=500`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(RewindConfig::default()))
            .merge(Toml::file("rewind.toml"));

        if let Ok(path) = std::env::var("REWIND_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let figment = figment.merge(
            Env::prefixed("REWIND_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );

        let config: RewindConfig = figment.extract().map_err(|e| {
            RewindError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: RewindConfig = Figment::from(Serialized::defaults(RewindConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                RewindError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.query.default_limit == 0 {
            return Err(RewindError::Configuration(
                "query.default_limit must be greater than zero".to_string(),
            ));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(RewindError::Configuration(format!(
                "query.default_limit ({}) exceeds query.max_limit ({})",
                self.query.default_limit, self.query.max_limit
            )));
        }
        if self.replay.max_replay_events == 0 {
            return Err(RewindError::Configuration(
                "replay.max_replay_events must be greater than zero".to_string(),
            ));
        }
        if self.replay.reexecution_timeout.is_zero() {
            return Err(RewindError::Configuration(
                "replay.reexecution_timeout must be non-zero".to_string(),
            ));
        }
        if self.replay.max_concurrent_replays == 0 {
            return Err(RewindError::Configuration(
                "replay.max_concurrent_replays must be greater than zero".to_string(),
            ));
        }
        for price in &self.pricing {
            price.validate()?;
        }
        if let StoreConfig::SurrealDb { url, .. } = &self.store
            && url.trim().is_empty()
        {
            return Err(RewindError::Configuration(
                "store.url is required for the surrealdb backend".to_string(),
            ));
        }
        Ok(())
    }
}
