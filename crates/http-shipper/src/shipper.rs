//! HTTP shipping client for the collector's sync endpoint.

use crate::{ShipperError, ShipperResult};
use async_trait::async_trait;
use dispatch_pool::{ShipOutcome, ShippingClient};
use event_cache::{QueuedItem, DEFAULT_MAX_COUNT};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shipper configuration.
#[derive(Debug, Clone)]
pub struct HttpShipperConfig {
    /// Full URL of the collector's sync endpoint.
    pub collector_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Events not accepted this long after their first attempt are dropped.
    pub max_item_age: Duration,
    /// Most first-attempt times kept; matches the cache capacity so ids the
    /// cache has evicted cannot pile up.
    pub max_tracked: usize,
}

impl Default for HttpShipperConfig {
    fn default() -> Self {
        Self {
            collector_url: "https://events.example.com/sync".to_string(),
            timeout: Duration::from_secs(30),
            max_item_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_tracked: DEFAULT_MAX_COUNT,
        }
    }
}

/// Per-event status reported by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Accepted.
    Ack,
    /// Temporarily rejected; send again later.
    Nack,
    /// Rejected for good; sending it again cannot succeed.
    ValidationError,
    /// Anything this client does not understand is retried.
    #[serde(other)]
    Unknown,
}

impl DeliveryStatus {
    /// Whether the event should leave the queue.
    pub fn is_final(self) -> bool {
        matches!(self, DeliveryStatus::Ack | DeliveryStatus::ValidationError)
    }
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    events: Vec<&'a RawValue>,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    events: Vec<EventReceipt>,
}

#[derive(Debug, Deserialize)]
struct EventReceipt {
    id: String,
    status: DeliveryStatus,
}

/// Ships batches to the collector over HTTP.
///
/// Transport failures are logged and reported as "nothing delivered"; the
/// pool handles the retry.
pub struct HttpShipper {
    config: HttpShipperConfig,
    client: Client,
    first_attempts: Mutex<HashMap<String, Instant>>,
}

impl HttpShipper {
    /// Create a new shipper.
    pub fn new(config: HttpShipperConfig) -> ShipperResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            config,
            client,
            first_attempts: Mutex::new(HashMap::new()),
        })
    }

    /// Number of ids whose first attempt is being tracked.
    pub fn tracked_count(&self) -> usize {
        self.first_attempts.lock().len()
    }

    /// Single POST of the given events.
    async fn try_send(&self, events: &[&RawValue]) -> ShipperResult<Vec<EventReceipt>> {
        let request = SyncRequest {
            events: events.to_vec(),
        };

        debug!(
            url = %self.config.collector_url,
            events = events.len(),
            "Sending batch"
        );

        let response = self
            .client
            .post(&self.config.collector_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ShipperError::Collector {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let parsed: SyncResponse = serde_json::from_slice(&body)?;
        Ok(parsed.events)
    }

    /// Record `now` as the first attempt of every id not seen before.
    fn note_attempts<'a>(&self, ids: impl IntoIterator<Item = &'a str>, now: Instant) {
        let mut attempts = self.first_attempts.lock();
        for id in ids {
            attempts.entry(id.to_string()).or_insert(now);
        }
    }

    /// Ids among `pending` whose first attempt is older than `max_item_age`.
    fn expired<'a>(&self, pending: impl IntoIterator<Item = &'a str>, now: Instant) -> Vec<String> {
        let attempts = self.first_attempts.lock();
        pending
            .into_iter()
            .filter(|id| {
                attempts
                    .get(*id)
                    .is_some_and(|first| now.saturating_duration_since(*first) >= self.config.max_item_age)
            })
            .map(str::to_string)
            .collect()
    }

    /// Drop first-attempt times of ids outside `current` that are past
    /// `max_item_age`, then the oldest of the rest beyond `max_tracked`.
    ///
    /// Ids outside the current batch were either delivered elsewhere or
    /// evicted by the cache, so they may never be shipped again.
    fn prune(&self, current: &HashSet<&str>, now: Instant) {
        let mut attempts = self.first_attempts.lock();
        let max_age = self.config.max_item_age;
        attempts.retain(|id, first| {
            current.contains(id.as_str()) || now.saturating_duration_since(*first) < max_age
        });

        let excess = attempts.len().saturating_sub(self.config.max_tracked);
        if excess == 0 {
            return;
        }
        let mut idle: Vec<(Instant, String)> = attempts
            .iter()
            .filter(|(id, _)| !current.contains(id.as_str()))
            .map(|(id, first)| (*first, id.clone()))
            .collect();
        idle.sort_unstable();
        for (_, id) in idle.into_iter().take(excess) {
            attempts.remove(&id);
        }
        debug!(tracked = attempts.len(), "Pruned first-attempt times");
    }

    fn forget(&self, ids: &[String]) {
        let mut attempts = self.first_attempts.lock();
        for id in ids {
            attempts.remove(id);
        }
    }

    /// Resolve a batch to the ids the pool should drop.
    async fn deliver(&self, batch: &[QueuedItem], now: Instant) -> Vec<String> {
        let (valid, invalid) = split_payloads(batch);
        let mut removed: Vec<String> = Vec::with_capacity(batch.len());

        for id in invalid {
            warn!(item_id = %id, "Dropping event with invalid JSON payload");
            removed.push(id.to_string());
        }

        if !valid.is_empty() {
            self.note_attempts(valid.iter().map(|(id, _)| *id), now);
            let current: HashSet<&str> = valid.iter().map(|(id, _)| *id).collect();
            self.prune(&current, now);

            let payloads: Vec<&RawValue> = valid.iter().map(|(_, raw)| *raw).collect();
            match self.try_send(&payloads).await {
                Ok(receipts) => {
                    let accepted = final_ids(&receipts, &current);
                    info!(
                        sent = current.len(),
                        accepted = accepted.len(),
                        "Batch delivered"
                    );
                    removed.extend(accepted);
                }
                Err(e) => {
                    warn!(
                        url = %self.config.collector_url,
                        events = valid.len(),
                        error = %e,
                        "Send failed"
                    );
                }
            }

            let done: HashSet<&str> = removed.iter().map(String::as_str).collect();
            let still_pending = valid.iter().map(|(id, _)| *id).filter(|id| !done.contains(id));
            let stale = self.expired(still_pending, now);
            for id in &stale {
                warn!(
                    item_id = %id,
                    max_age_secs = self.config.max_item_age.as_secs(),
                    "Dropping event that was never accepted"
                );
            }
            removed.extend(stale);
        }

        self.forget(&removed);
        removed
    }
}

#[async_trait]
impl ShippingClient for HttpShipper {
    async fn ship(&self, batch: Vec<QueuedItem>) -> ShipOutcome {
        let removed = self.deliver(&batch, Instant::now()).await;
        ShipOutcome::removed(removed)
    }
}

impl std::fmt::Debug for HttpShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpShipper")
            .field("config", &self.config)
            .field("tracked", &self.tracked_count())
            .finish_non_exhaustive()
    }
}

/// Partition a batch into parseable payloads and the ids of unparseable ones.
fn split_payloads(batch: &[QueuedItem]) -> (Vec<(&str, &RawValue)>, Vec<&str>) {
    let mut valid = Vec::with_capacity(batch.len());
    let mut invalid = Vec::new();
    for item in batch {
        match serde_json::from_slice::<&RawValue>(&item.payload) {
            Ok(raw) => valid.push((item.id.as_str(), raw)),
            Err(_) => invalid.push(item.id.as_str()),
        }
    }
    (valid, invalid)
}

/// Ids with a final status, limited to those actually sent.
fn final_ids(receipts: &[EventReceipt], sent: &HashSet<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    receipts
        .iter()
        .filter(|r| r.status.is_final() && sent.contains(r.id.as_str()))
        .filter(|r| seen.insert(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect()
}
