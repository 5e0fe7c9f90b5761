//! Shipper error types.

use thiserror::Error;

/// Errors from a single delivery attempt.
///
/// They are logged by the shipper and reported to the pool as "nothing
/// acknowledged"; they never reach the pool itself.
#[derive(Error, Debug)]
pub enum ShipperError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("Collector error: {status} - {message}")]
    Collector {
        /// The HTTP status code returned by the collector.
        status: u16,
        /// The response body.
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ShipperError.
pub type ShipperResult<T> = Result<T, ShipperError>;
