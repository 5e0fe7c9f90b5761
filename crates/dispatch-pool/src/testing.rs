//! In-process shipping client for tests.
//!
//! [`RecordingShipper`] records every batch it receives together with the
//! (tokio) time of the call, and acknowledges according to an [`AckPolicy`].
//! A gated shipper holds each call open until [`RecordingShipper::release`]
//! is called, which makes in-flight behaviour observable.

use crate::{ShipOutcome, ShippingClient};
use async_trait::async_trait;
use event_cache::QueuedItem;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

/// Which ids of a batch a [`RecordingShipper`] reports as removed.
#[derive(Debug, Clone)]
pub enum AckPolicy {
    /// Acknowledge the whole batch.
    All,
    /// Acknowledge nothing (simulates a collector outage).
    None,
    /// Acknowledge the first `n` items of each batch.
    FirstN(usize),
    /// Acknowledge only these ids when present in the batch.
    Ids(HashSet<String>),
}

impl AckPolicy {
    fn outcome_for(&self, batch: &[QueuedItem]) -> ShipOutcome {
        match self {
            AckPolicy::All => ShipOutcome::all(batch),
            AckPolicy::None => ShipOutcome::nothing_removed(),
            AckPolicy::FirstN(n) => ShipOutcome::all(&batch[..(*n).min(batch.len())]),
            AckPolicy::Ids(ids) => ShipOutcome::removed(
                batch
                    .iter()
                    .filter(|item| ids.contains(&item.id))
                    .map(|item| item.id.clone()),
            ),
        }
    }
}

/// One recorded `ship` call.
#[derive(Debug, Clone)]
pub struct ShipCall {
    pub ids: Vec<String>,
    pub at: Instant,
}

struct Inner {
    policy: Mutex<AckPolicy>,
    calls: Mutex<Vec<ShipCall>>,
    call_made: Notify,
    gate: Option<Semaphore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Shipping client that records batches instead of sending them.
#[derive(Clone)]
pub struct RecordingShipper {
    inner: Arc<Inner>,
}

impl RecordingShipper {
    pub fn new(policy: AckPolicy) -> Self {
        Self::build(policy, None)
    }

    /// A shipper whose calls block until [`release`](Self::release) is called.
    pub fn gated(policy: AckPolicy) -> Self {
        Self::build(policy, Some(Semaphore::new(0)))
    }

    fn build(policy: AckPolicy, gate: Option<Semaphore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy: Mutex::new(policy),
                calls: Mutex::new(Vec::new()),
                call_made: Notify::new(),
                gate,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Change the acknowledgement policy for subsequent calls.
    pub fn set_policy(&self, policy: AckPolicy) {
        *self.inner.policy.lock() = policy;
    }

    /// Let `n` blocked (or future) calls complete. No-op when not gated.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.inner.gate.as_ref() {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> Vec<ShipCall> {
        self.inner.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// Highest number of `ship` calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` calls have been made and return the `n`th.
    pub async fn wait_for_call(&self, n: usize) -> ShipCall {
        assert!(n > 0, "calls are numbered from 1");
        loop {
            let notified = self.inner.call_made.notified();
            if let Some(call) = self.inner.calls.lock().get(n - 1).cloned() {
                return call;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ShippingClient for RecordingShipper {
    async fn ship(&self, batch: Vec<QueuedItem>) -> ShipOutcome {
        let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(running, Ordering::SeqCst);

        self.inner.calls.lock().push(ShipCall {
            ids: batch.iter().map(|item| item.id.clone()).collect(),
            at: Instant::now(),
        });
        self.inner.call_made.notify_waiters();

        if let Some(gate) = self.inner.gate.as_ref() {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let outcome = self.inner.policy.lock().outcome_for(&batch);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl std::fmt::Debug for RecordingShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingShipper")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}
