//! HTTP delivery of event batches.
//!
//! This crate provides:
//! - HttpShipper: a `ShippingClient` that posts batches to the collector and
//!   maps its per-event statuses to the ids the pool should drop
//! - A stale-item policy: events the collector has not accepted within
//!   `max_item_age` of their first attempt are reported as removed

mod error;
mod shipper;

pub use error::{ShipperError, ShipperResult};
pub use shipper::{DeliveryStatus, HttpShipper, HttpShipperConfig};
