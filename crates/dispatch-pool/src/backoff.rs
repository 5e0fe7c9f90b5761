//! Delay growth after flushes that make no progress.

use std::time::Duration;

/// Multiplier applied to the effective delay after a zero-progress flush.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.1;

/// Upper bound for the extra delay added to the dispatch interval.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// How the extra delay grows while flushes remove nothing.
///
/// The effective wait between attempts is `interval + backoff`. Each failed
/// flush multiplies that effective wait by `factor`, so consecutive failures
/// compound:
///
/// | Failures | Effective wait (interval = 120s, factor = 1.1) |
/// |----------|-----------------------------------------------|
/// | 0        | 120s                                          |
/// | 1        | 132s                                          |
/// | 2        | 145.2s                                        |
/// | 3        | 159.72s                                       |
///
/// The extra delay never exceeds `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub factor: f64,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            factor: DEFAULT_BACKOFF_FACTOR,
            ceiling: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl BackoffPolicy {
    /// Extra delay to use after another zero-progress flush.
    pub fn next_delay(&self, interval: Duration, current: Duration) -> Duration {
        // `max` drops NaN, so a malformed factor degrades to no growth.
        let factor = self.factor.max(1.0);
        let effective = interval.saturating_add(current);
        let grown = Duration::try_from_secs_f64(effective.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);

        grown
            .saturating_sub(interval)
            .max(current)
            .min(self.ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(actual: Duration, expected_secs: f64) {
        let diff = (actual.as_secs_f64() - expected_secs).abs();
        assert!(diff < 1e-6, "expected {}s, got {:?}", expected_secs, actual);
    }

    #[test]
    fn default_policy_values() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.factor, 1.1);
        assert_eq!(policy.ceiling, Duration::from_secs(300));
    }

    #[test]
    fn effective_delay_compounds_by_factor() {
        let policy = BackoffPolicy::default();
        let interval = Duration::from_secs(120);

        let first = policy.next_delay(interval, Duration::ZERO);
        approx(first, 12.0);

        let second = policy.next_delay(interval, first);
        approx(interval + second, 145.2);

        let third = policy.next_delay(interval, second);
        approx(interval + third, 159.72);
    }

    #[test]
    fn delay_caps_at_ceiling() {
        let policy = BackoffPolicy {
            factor: 2.0,
            ceiling: Duration::from_secs(30),
        };
        let interval = Duration::from_secs(10);

        let mut delay = Duration::ZERO;
        for _ in 0..10 {
            delay = policy.next_delay(interval, delay);
            assert!(delay <= Duration::from_secs(30));
        }
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn delay_is_non_decreasing() {
        let policy = BackoffPolicy::default();
        let interval = Duration::from_secs(5);

        let mut delay = Duration::ZERO;
        for _ in 0..200 {
            let next = policy.next_delay(interval, delay);
            assert!(next >= delay);
            delay = next;
        }
        assert_eq!(delay, policy.ceiling);
    }

    #[test]
    fn factor_below_one_never_shrinks_delay() {
        let policy = BackoffPolicy {
            factor: 0.5,
            ceiling: Duration::from_secs(300),
        };
        let current = Duration::from_secs(7);
        assert_eq!(policy.next_delay(Duration::from_secs(10), current), current);
    }

    #[test]
    fn huge_interval_saturates_instead_of_panicking() {
        let policy = BackoffPolicy::default();
        let delay = policy.next_delay(Duration::MAX, Duration::from_secs(1));
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= policy.ceiling);
    }
}
