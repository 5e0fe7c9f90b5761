//! Event cache error types.

use thiserror::Error;

/// Errors raised by the on-disk store.
///
/// These never escape [`EventCache`](crate::EventCache) operations; the cache
/// logs them and falls back to memory-only operation.
#[derive(Error, Debug)]
pub enum CacheError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored record could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The backing file was written by an unknown format version
    #[error("Unsupported cache file version {0}")]
    UnsupportedVersion(u32),
}

/// Result type alias using CacheError.
pub type CacheResult<T> = Result<T, CacheError>;
