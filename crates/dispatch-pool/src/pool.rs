//! Dispatch pool: decides when cached events are shipped.

use crate::{BackoffPolicy, DispatchTimer, ShipOutcome, ShipperHandle};
use event_cache::{EventCache, QueuedItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Default time between flush attempts below the count threshold.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(120);

/// Default queue length that triggers an immediate flush.
pub const DEFAULT_DISPATCH_LIMIT: usize = 100;

/// Configuration for flush timing and batching.
#[derive(Debug, Clone)]
pub struct DispatchPoolConfig {
    /// Nominal time between flush attempts.
    pub dispatch_interval: Duration,
    /// Queue length that triggers a flush; also the maximum batch size.
    pub dispatch_limit: usize,
    /// Delay growth after flushes that remove nothing.
    pub backoff: BackoffPolicy,
}

impl Default for DispatchPoolConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            dispatch_limit: DEFAULT_DISPATCH_LIMIT,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Snapshot of the pool's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStatus {
    /// Items in the cache, including any in the in-flight batch.
    pub pending: usize,
    pub is_flushing: bool,
    /// Extra delay currently added to the dispatch interval.
    pub backoff_delay: Duration,
    pub timer_armed: bool,
    pub dispatch_limit: usize,
    pub dispatch_interval: Duration,
}

impl PoolStatus {
    /// Wait the timer uses when armed: interval plus backoff.
    pub fn effective_delay(&self) -> Duration {
        self.dispatch_interval.saturating_add(self.backoff_delay)
    }
}

/// Messages processed by the pool actor, one at a time.
enum Command {
    Push(QueuedItem),
    Flush,
    SetDispatchLimit(usize),
    SetDispatchInterval(Duration),
    ShipCompleted { batch_len: usize, outcome: ShipOutcome },
    Status(oneshot::Sender<PoolStatus>),
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Startup,
    Threshold,
    Timer,
    External,
    LimitChanged,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Threshold => "threshold",
            Self::Timer => "timer",
            Self::External => "external",
            Self::LimitChanged => "limit_changed",
        }
    }
}

/// Handle to a running dispatch pool.
///
/// All state lives in a background actor task, which serialises pushes,
/// flush requests, timer fires and shipping completions. The handle is cheap
/// to clone and every method returns without waiting for the network.
///
/// # Lifecycle
///
/// 1. Open an [`EventCache`] (possibly restoring items from disk)
/// 2. Call [`DispatchPool::spawn()`] with the cache and a shipping client
/// 3. The pool flushes right away if the restored queue already meets the
///    limit, otherwise it arms its timer
/// 4. [`push()`](Self::push) events; call [`flush()`](Self::flush) when the
///    host is about to be suspended
///
/// The actor stops once every handle is dropped and no `ship` call is
/// outstanding.
#[derive(Clone)]
pub struct DispatchPool {
    commands: mpsc::UnboundedSender<Command>,
    cache: Arc<EventCache>,
}

impl DispatchPool {
    /// Start the pool actor on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(cache: EventCache, shipper: ShipperHandle, config: DispatchPoolConfig) -> Self {
        let cache = Arc::new(cache);
        let (commands, receiver) = mpsc::unbounded_channel();

        let actor = PoolActor {
            cache: cache.clone(),
            shipper,
            dispatch_limit: config.dispatch_limit.max(1),
            dispatch_interval: config.dispatch_interval,
            backoff: config.backoff,
            backoff_delay: Duration::ZERO,
            is_flushing: false,
            timer: DispatchTimer::new(),
            completions: commands.downgrade(),
        };
        tokio::spawn(actor.run(receiver));

        Self { commands, cache }
    }

    /// Queue an item; flushes immediately if the count threshold is reached.
    pub fn push(&self, item: QueuedItem) {
        if let Err(mpsc::error::SendError(command)) = self.commands.send(Command::Push(item)) {
            // The actor is gone; keep the item so it is persisted and shipped
            // by the next pool opened on this cache file.
            if let Command::Push(item) = command {
                warn!(item_id = %item.id, "Dispatch pool stopped, caching item without dispatch");
                self.cache.write_to_tail([item]);
            }
        }
    }

    /// Request a flush now (e.g. the host is about to be suspended).
    ///
    /// Dropped if a flush is already in flight or the queue is empty.
    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    /// Change the count threshold and batch size.
    pub fn set_dispatch_limit(&self, limit: usize) {
        self.send(Command::SetDispatchLimit(limit));
    }

    /// Change the nominal flush interval, keeping any accumulated backoff.
    pub fn set_dispatch_interval(&self, interval: Duration) {
        self.send(Command::SetDispatchInterval(interval));
    }

    /// Number of items waiting in the cache.
    pub fn pending_count(&self) -> usize {
        self.cache.count()
    }

    /// Snapshot of the pool's state, taken after every previously issued
    /// command has been applied. Returns `None` if the actor has stopped.
    pub async fn status(&self) -> Option<PoolStatus> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Status(reply)).ok()?;
        response.await.ok()
    }

    /// The cache this pool drains.
    pub fn cache(&self) -> &EventCache {
        &self.cache
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Dispatch pool stopped, dropping command");
        }
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

struct PoolActor {
    cache: Arc<EventCache>,
    shipper: ShipperHandle,
    dispatch_limit: usize,
    dispatch_interval: Duration,
    backoff: BackoffPolicy,
    backoff_delay: Duration,
    is_flushing: bool,
    timer: DispatchTimer,
    /// Weak so that outstanding handles, not the actor itself, keep it alive.
    completions: mpsc::WeakUnboundedSender<Command>,
}

impl PoolActor {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        info!(
            pending = self.cache.count(),
            dispatch_limit = self.dispatch_limit,
            dispatch_interval_ms = self.dispatch_interval.as_millis() as u64,
            "Dispatch pool started"
        );

        if self.cache.count() >= self.dispatch_limit {
            self.flush(FlushTrigger::Startup);
        } else {
            self.arm_timer_if_needed();
        }

        loop {
            tokio::select! {
                command = receiver.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = self.timer.fired(), if self.timer.is_armed() => {
                    // Invalidate first so the flush path never sees a stale timer.
                    self.timer.cancel();
                    self.flush(FlushTrigger::Timer);
                }
            }
        }

        debug!(pending = self.cache.count(), "Dispatch pool stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Push(item) => self.push(item),
            Command::Flush => self.flush(FlushTrigger::External),
            Command::SetDispatchLimit(limit) => self.set_dispatch_limit(limit),
            Command::SetDispatchInterval(interval) => self.set_dispatch_interval(interval),
            Command::ShipCompleted { batch_len, outcome } => {
                self.on_ship_completed(batch_len, outcome)
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn push(&mut self, item: QueuedItem) {
        debug!(item_id = %item.id, "Queued event");
        self.cache.write_to_tail([item]);

        if self.cache.count() >= self.dispatch_limit {
            self.flush(FlushTrigger::Threshold);
        } else {
            self.arm_timer_if_needed();
        }
    }

    fn flush(&mut self, trigger: FlushTrigger) {
        if self.is_flushing {
            debug!(trigger = trigger.as_str(), "Flush already in flight, ignoring");
            return;
        }

        let batch = self.cache.read_from_head(self.dispatch_limit);
        if batch.is_empty() {
            self.timer.cancel();
            return;
        }

        let Some(completions) = self.completions.upgrade() else {
            // Every handle is gone and the actor is draining its queue.
            return;
        };

        self.is_flushing = true;
        self.timer.cancel();

        let batch_len = batch.len();
        debug!(
            trigger = trigger.as_str(),
            batch_len,
            pending = self.cache.count(),
            "Flushing events"
        );

        let shipper = self.shipper.clone();
        tokio::spawn(async move {
            // Run the shipper in its own task so a panic is contained and
            // reported as "nothing removed".
            let outcome = match tokio::spawn(async move { shipper.ship(batch).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Shipping task failed");
                    ShipOutcome::nothing_removed()
                }
            };
            let _ = completions.send(Command::ShipCompleted { batch_len, outcome });
        });
    }

    fn on_ship_completed(&mut self, batch_len: usize, outcome: ShipOutcome) {
        let removed_ids = outcome.into_removed_ids();
        let removed = self.cache.remove(removed_ids.as_slice());

        if removed_ids.is_empty() {
            self.backoff_delay = self
                .backoff
                .next_delay(self.dispatch_interval, self.backoff_delay);
            warn!(
                batch_len,
                backoff_ms = self.backoff_delay.as_millis() as u64,
                "Flush made no progress, backing off"
            );
        } else {
            if !self.backoff_delay.is_zero() {
                info!("Flush succeeded, backoff reset");
            }
            self.backoff_delay = Duration::ZERO;
            debug!(
                batch_len,
                acknowledged = removed_ids.len(),
                removed,
                pending = self.cache.count(),
                "Flush completed"
            );
        }

        self.is_flushing = false;
        self.arm_timer_if_needed();
    }

    fn set_dispatch_limit(&mut self, limit: usize) {
        self.dispatch_limit = limit.max(1);
        debug!(dispatch_limit = self.dispatch_limit, "Dispatch limit changed");

        if self.cache.count() >= self.dispatch_limit {
            self.flush(FlushTrigger::LimitChanged);
        }
    }

    fn set_dispatch_interval(&mut self, interval: Duration) {
        self.dispatch_interval = interval;
        debug!(
            dispatch_interval_ms = interval.as_millis() as u64,
            backoff_ms = self.backoff_delay.as_millis() as u64,
            "Dispatch interval changed"
        );

        // Reschedule with the new period plus whatever backoff has built up.
        self.timer.cancel();
        self.arm_timer_if_needed();
    }

    /// Arm the timer unless it is already armed, a flush is in flight, or
    /// there is nothing to ship.
    fn arm_timer_if_needed(&mut self) {
        if self.is_flushing || self.cache.is_empty() {
            self.timer.cancel();
            return;
        }
        if self.timer.is_armed() {
            return;
        }
        self.timer
            .arm(self.dispatch_interval.saturating_add(self.backoff_delay));
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            pending: self.cache.count(),
            is_flushing: self.is_flushing,
            backoff_delay: self.backoff_delay,
            timer_armed: self.timer.is_armed(),
            dispatch_limit: self.dispatch_limit,
            dispatch_interval: self.dispatch_interval,
        }
    }
}
