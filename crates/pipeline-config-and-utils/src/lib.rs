//! Configuration, paths and logging bootstrap for the event pipeline.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_COLLECTOR_URL, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
