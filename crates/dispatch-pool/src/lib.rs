//! # DispatchPool: event shipping controller
//!
//! Decides when queued events leave the [`EventCache`](event_cache::EventCache)
//! and hands them to a [`ShippingClient`].
//!
//! ## Architecture
//!
//! ```text
//! push/flush ──▶ ┌──────────────────┐  batch   ┌────────────────┐
//!  (any task)    │    pool actor    │─────────▶│ ShippingClient │
//!                │ (serial context) │◀─────────│ (spawned task) │
//!                └────────┬─────────┘ removed  └────────────────┘
//!                         │                ids
//!                  ┌──────▼──────┐
//!                  │ EventCache  │
//!                  └─────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Count threshold**: a push that brings the queue to `dispatch_limit`
//!   items flushes immediately.
//! - **Timer**: otherwise a single timer flushes after
//!   `dispatch_interval + backoff_delay`.
//! - **Single-flight**: at most one `ship` call is outstanding; flush
//!   requests during a flight are dropped.
//! - **Partial acknowledgement**: only the ids reported back are removed;
//!   the rest are retried on a later flush (at-least-once).
//! - **Backoff**: flushes that remove nothing stretch the timer by
//!   [`BackoffPolicy::factor`] up to [`BackoffPolicy::ceiling`].

mod backoff;
mod pool;
pub mod shared;
mod shipping;
pub mod testing;
mod timer;

pub use backoff::{BackoffPolicy, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_BACKOFF};
pub use pool::{
    DispatchPool, DispatchPoolConfig, PoolStatus, DEFAULT_DISPATCH_INTERVAL,
    DEFAULT_DISPATCH_LIMIT,
};
pub use shipping::{ShipOutcome, ShipperHandle, ShippingClient};
pub use timer::DispatchTimer;
