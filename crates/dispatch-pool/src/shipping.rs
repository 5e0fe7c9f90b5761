//! Contract between the pool and the transport that delivers batches.

use async_trait::async_trait;
use event_cache::QueuedItem;
use std::sync::Arc;

/// Delivers batches to the remote collector.
///
/// Transport failures are not errors at this boundary: an implementation
/// reports them by returning an outcome that removes nothing. Any id of the
/// batch missing from the outcome stays queued and is shipped again later.
///
/// The pool never calls `ship` again before the previous call has returned.
#[async_trait]
pub trait ShippingClient: Send + Sync + 'static {
    async fn ship(&self, batch: Vec<QueuedItem>) -> ShipOutcome;
}

/// Thread-safe handle to a shipping client.
pub type ShipperHandle = Arc<dyn ShippingClient>;

/// Ids the pool should drop from the cache after a `ship` call.
///
/// An id may be reported for reasons other than delivery (for example a
/// shipping layer giving up on a stale item); the pool does not care why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipOutcome {
    removed: Vec<String>,
}

impl ShipOutcome {
    pub fn removed<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            removed: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Nothing was acknowledged (e.g. the collector was unreachable).
    pub fn nothing_removed() -> Self {
        Self::default()
    }

    /// Every item of `batch` was acknowledged.
    pub fn all(batch: &[QueuedItem]) -> Self {
        Self::removed(batch.iter().map(|item| item.id.clone()))
    }

    pub fn removed_ids(&self) -> &[String] {
        &self.removed
    }

    pub fn into_removed_ids(self) -> Vec<String> {
        self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_lists_batch_ids_in_order() {
        let batch = vec![QueuedItem::new("a", "1"), QueuedItem::new("b", "2")];
        let outcome = ShipOutcome::all(&batch);
        assert_eq!(outcome.removed_ids(), ["a", "b"]);
        assert!(!outcome.is_empty());
    }

    #[test]
    fn nothing_removed_is_empty() {
        assert!(ShipOutcome::nothing_removed().is_empty());
        assert_eq!(ShipOutcome::nothing_removed(), ShipOutcome::default());
    }
}
