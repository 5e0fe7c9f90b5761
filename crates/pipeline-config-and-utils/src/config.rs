//! Configuration management for the pipeline.

use crate::{CoreError, CoreResult, Paths};
use dispatch_pool::{BackoffPolicy, DispatchPoolConfig};
use event_cache::EventCacheConfig;
use http_shipper::HttpShipperConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default collector endpoint.
pub const DEFAULT_COLLECTOR_URL: &str = "https://events.example.com/sync";

const ENV_LOG_LEVEL: &str = "EVENT_PIPELINE_LOG_LEVEL";
const ENV_COLLECTOR_URL: &str = "EVENT_PIPELINE_COLLECTOR_URL";

/// Main pipeline configuration.
///
/// Missing fields in the config file take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Seconds between timer-driven flushes.
    pub dispatch_interval_secs: u64,
    /// Queue depth that triggers an immediate flush; also the batch size.
    pub dispatch_limit: usize,
    /// Maximum number of events kept in the cache.
    pub max_cache_count: usize,
    /// Cache file name inside the cache directory.
    pub cache_file_name: String,
    /// Debounce window for coalescing cache writes.
    pub persist_debounce_ms: u64,
    /// Growth factor applied after a flush that made no progress.
    pub backoff_factor: f64,
    /// Ceiling for the accumulated backoff.
    pub max_backoff_secs: u64,
    /// Collector sync endpoint.
    pub collector_url: String,
    /// HTTP request timeout.
    pub request_timeout_secs: u64,
    /// Events never accepted within this age are dropped by the shipper.
    pub max_item_age_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            dispatch_interval_secs: 120,
            dispatch_limit: 100,
            max_cache_count: 1000,
            cache_file_name: "events.cache.json".to_string(),
            persist_debounce_ms: 200,
            backoff_factor: 1.1,
            max_backoff_secs: 300,
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            request_timeout_secs: 30,
            max_item_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|value: &String| !value.trim().is_empty());

        if let Some(log_level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(url) = non_empty(ENV_COLLECTOR_URL) {
            self.collector_url = url;
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.dispatch_interval_secs == 0 {
            return Err(CoreError::Config(
                "dispatch_interval_secs must be at least 1".into(),
            ));
        }
        if self.dispatch_limit == 0 {
            return Err(CoreError::Config("dispatch_limit must be at least 1".into()));
        }
        if self.max_cache_count == 0 {
            return Err(CoreError::Config("max_cache_count must be at least 1".into()));
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            return Err(CoreError::Config(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.cache_file_name.trim().is_empty() {
            return Err(CoreError::Config("cache_file_name must not be empty".into()));
        }
        self.collector_url()?;
        Ok(())
    }

    /// Get the collector URL as a parsed URL.
    pub fn collector_url(&self) -> CoreResult<Url> {
        Url::parse(&self.collector_url).map_err(CoreError::from)
    }

    /// Settings for the dispatch pool.
    pub fn pool_config(&self) -> DispatchPoolConfig {
        DispatchPoolConfig {
            dispatch_interval: Duration::from_secs(self.dispatch_interval_secs),
            dispatch_limit: self.dispatch_limit,
            backoff: BackoffPolicy {
                factor: self.backoff_factor,
                ceiling: Duration::from_secs(self.max_backoff_secs),
            },
        }
    }

    /// Settings for the persistent event cache under `paths`.
    pub fn cache_config(&self, paths: &Paths) -> EventCacheConfig {
        EventCacheConfig {
            max_count: self.max_cache_count,
            persist_debounce: Duration::from_millis(self.persist_debounce_ms),
            file_path: Some(paths.cache_file(&self.cache_file_name)),
        }
    }

    /// Settings for the HTTP shipper.
    pub fn shipper_config(&self) -> HttpShipperConfig {
        HttpShipperConfig {
            collector_url: self.collector_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_item_age: Duration::from_secs(self.max_item_age_secs),
            max_tracked: self.max_cache_count,
        }
    }
}
