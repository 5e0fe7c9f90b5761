//! # Observability
//!
//! Centralized logging for the event pipeline.
//!
//! Binaries call `observability::init_with_config()` once at startup and use
//! the standard `tracing` macros everywhere else. Library crates never
//! install a subscriber.
//!
//! ## Dev Mode
//!
//! With the `dev` feature (on by default) every process writes structured
//! JSONL to a single central file:
//! `~/.event-pipeline/logs/dev.jsonl`
//!
//! - `tail -f ~/.event-pipeline/logs/dev.jsonl | jq` for pretty JSON
//! - `lnav ~/.event-pipeline/logs/dev.jsonl` for interactive exploration
//!
//! Multi-process safety is achieved through append-only writes with
//! per-line flush semantics.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "event-pipeline".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("service started");
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;

pub use json_layer::{JsonLayer, LogEntry};

use std::path::PathBuf;

/// How much detail log lines carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservabilityMode {
    /// Every field plus source location.
    #[default]
    DevVerbose,
    /// No source location, and payload-bearing fields are redacted.
    ProdMetadataOnly,
}

impl ObservabilityMode {
    /// Parse `dev` / `prod` (and their long forms). Anything else is dev.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::ProdMetadataOnly,
            _ => Self::DevVerbose,
        }
    }

    pub fn environment(self) -> &'static str {
        match self {
            Self::DevVerbose => "development",
            Self::ProdMetadataOnly => "production",
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.event-pipeline/logs/dev.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,

    /// Runtime observability mode.
    pub mode: ObservabilityMode,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            mode: ObservabilityMode::DevVerbose,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless; only the first subscriber is
/// installed.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        if dev::init_dev_subscriber(&config).is_ok() {
            return;
        }
    }

    init_stderr_subscriber(&config);
}

/// Compact human-readable subscriber on stderr.
fn init_stderr_subscriber(config: &LogConfig) {
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.default_level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .finish()
        .try_init();
}

/// `RUST_LOG` if set, otherwise `default_level`.
fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
        assert_eq!(config.mode, ObservabilityMode::DevVerbose);
    }

    #[test]
    fn test_mode_from_name() {
        assert_eq!(ObservabilityMode::from_name("prod"), ObservabilityMode::ProdMetadataOnly);
        assert_eq!(
            ObservabilityMode::from_name(" Production "),
            ObservabilityMode::ProdMetadataOnly
        );
        assert_eq!(ObservabilityMode::from_name("dev"), ObservabilityMode::DevVerbose);
        assert_eq!(ObservabilityMode::from_name(""), ObservabilityMode::DevVerbose);
        assert_eq!(ObservabilityMode::ProdMetadataOnly.environment(), "production");
    }
}
