//! Logging initialization for pipeline binaries.
//!
//! Wraps the observability crate. Logs are structured JSONL written to
//! `~/.event-pipeline/logs/dev.jsonl` and mirrored to stderr.

use observability::{LogConfig, ObservabilityMode};
use std::path::PathBuf;

const ENV_OBS_MODE: &str = "EVENT_PIPELINE_OBS_MODE";

/// Initialize the logging system.
///
/// * `level` - Default log level (trace, debug, info, warn, error); `RUST_LOG`
///   takes precedence when set.
/// * `log_path` - Central log file, `None` for the default location.
///
/// ```ignore
/// init_logging("info", Some(paths.log_file()));
/// tracing::info!("Pipeline started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    let mode = std::env::var(ENV_OBS_MODE)
        .map(|raw| ObservabilityMode::from_name(&raw))
        .unwrap_or_default();

    observability::init_with_config(LogConfig {
        service_name: "event-pipeline".into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path,
        also_stderr: true,
        mode,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
