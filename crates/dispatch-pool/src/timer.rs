//! Cancellable delayed trigger owned by the pool actor.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// A single re-armable deadline.
///
/// Arming replaces any previous deadline, so there is never more than one
/// outstanding timer. The owner awaits [`fired`](Self::fired) and must
/// [`cancel`](Self::cancel) before acting on it.
#[derive(Debug, Default)]
pub struct DispatchTimer {
    deadline: Option<Instant>,
}

impl DispatchTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves at the deadline; never resolves while disarmed.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}
