//! Bootstrap configuration loading
//!
//! Configuration path resolution priority:
//! 1. Command-line argument (`--config`, or the `TMON_CONFIG` environment
//!    variable through clap)
//! 2. Platform config directory: `<config_dir>/tmon/tmon.toml`
//! 3. Built-in defaults
//!
//! A missing TOML file is not fatal: the service logs a warning and starts
//! with defaults. A present but malformed file is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::wire::is_valid_url;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TMON_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Address the HTTP surface binds to
    pub bind_address: String,

    /// HTTP server port
    pub port: u16,

    pub logging: LoggingConfig,
    pub retry: RetryConfig,
    pub poller: PollerConfig,
    pub accumulator: AccumulatorConfig,
    pub endpoints: EndpointConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

/// Retry policy shared by every outbound hop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per delivery, including the first
    pub max_attempts: u32,
    /// Backoff before attempt k+1 is `base_delay_ms * k`
    pub base_delay_ms: u64,
    /// Bound on a single outbound call; expiry counts as one failed attempt
    pub call_timeout_ms: u64,
}

/// Source polling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub poll_interval_secs: u64,
    /// Articles per storage/index delivery batch
    pub batch_size: usize,
    /// Extra delivery rounds a bounded monitor spends draining undelivered
    /// batches before it completes
    pub completion_drain_attempts: u32,
    /// Source API request rate limit
    pub requests_per_second: u32,
}

/// Accumulation and compute parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Buffered article count that triggers a compute flush
    pub threshold: usize,
    pub num_topics: usize,
    pub num_top_words: usize,
    /// Fixed seed for the compute engine; unset means non-deterministic runs
    pub seed: Option<u64>,
    /// Results per delivery batch to the requester-facing sink
    pub result_batch_size: usize,
}

/// Collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub source_url: String,
    pub source_api_key: Option<String>,
    pub storage_url: String,
    pub search_url: String,
    pub compute_url: String,
    pub requester_url: String,
    /// Collection articles are stored and indexed under
    pub articles_collection: String,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5740,
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            poller: PollerConfig::default(),
            accumulator: AccumulatorConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            call_timeout_ms: 30_000,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            batch_size: 50,
            completion_drain_attempts: 3,
            requests_per_second: 5,
        }
    }
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            num_topics: 5,
            num_top_words: 10,
            seed: None,
            result_batch_size: 50,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            source_url: "http://127.0.0.1:5741".to_string(),
            source_api_key: None,
            storage_url: "http://127.0.0.1:5742".to_string(),
            search_url: "http://127.0.0.1:5743".to_string(),
            compute_url: "http://127.0.0.1:5744".to_string(),
            requester_url: "http://127.0.0.1:5745".to_string(),
            articles_collection: "articles".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl TomlConfig {
    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.call_timeout_ms == 0 {
            return Err(Error::Config("retry.call_timeout_ms must be positive".to_string()));
        }
        if self.poller.batch_size == 0 {
            return Err(Error::Config("poller.batch_size must be at least 1".to_string()));
        }
        if self.poller.requests_per_second == 0 {
            return Err(Error::Config(
                "poller.requests_per_second must be at least 1".to_string(),
            ));
        }
        if self.accumulator.threshold == 0 {
            return Err(Error::Config("accumulator.threshold must be at least 1".to_string()));
        }
        if self.accumulator.result_batch_size == 0 {
            return Err(Error::Config(
                "accumulator.result_batch_size must be at least 1".to_string(),
            ));
        }
        if self.accumulator.num_topics == 0 || self.accumulator.num_top_words == 0 {
            return Err(Error::Config(
                "accumulator.num_topics and num_top_words must be at least 1".to_string(),
            ));
        }

        let endpoints = [
            ("source_url", &self.endpoints.source_url),
            ("storage_url", &self.endpoints.storage_url),
            ("search_url", &self.endpoints.search_url),
            ("compute_url", &self.endpoints.compute_url),
            ("requester_url", &self.endpoints.requester_url),
        ];
        for (name, url) in endpoints {
            if !is_valid_url(url) {
                return Err(Error::Config(format!(
                    "endpoints.{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }
        if self.endpoints.articles_collection.trim().is_empty() {
            return Err(Error::Config(
                "endpoints.articles_collection must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve which config file to read
///
/// Returns `None` when neither an explicit path nor a platform config
/// directory is available.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    dirs::config_dir().map(|d| d.join("tmon").join("tmon.toml"))
}

/// Load and validate configuration from `path`
///
/// A missing file yields defaults with a warning.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let config = match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path)?;
            let config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            warn!("No config location available, using built-in defaults");
            TomlConfig::default()
        }
    };

    config.validate()?;
    Ok(config)
}
