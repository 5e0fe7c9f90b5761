//! Durable event cache for the tracking pipeline.
//!
//! This crate provides:
//! - EventCache: order-preserving, capacity-bounded in-memory queue with
//!   debounced (coalesced) persistence on a dedicated writer thread
//! - CacheStore: atomic whole-file JSON snapshot of the queue
//! - QueuedItem: the opaque unit that is stored and shipped

mod cache;
mod error;
mod item;
mod store;

pub use cache::{EventCache, EventCacheConfig, DEFAULT_MAX_COUNT, DEFAULT_PERSIST_DEBOUNCE};
pub use error::{CacheError, CacheResult};
pub use item::QueuedItem;
pub use store::{CacheStore, STORE_FORMAT_VERSION};
