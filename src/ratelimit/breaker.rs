//! Two-tier bucket guarded by a consecutive-failure circuit breaker.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::tiered::TieredBucket;

/// Breaker bookkeeping, guarded separately from the buckets.
#[derive(Debug, Default)]
struct BreakerState {
    /// Consecutive failed admissions since the last success or trip
    fail_count: u32,
    /// End of the reject window; `None` when the breaker is closed
    reject_until: Option<Instant>,
}

impl BreakerState {
    fn is_open(&self, now: Instant) -> bool {
        self.reject_until.is_some_and(|until| now < until)
    }
}

/// A [`TieredBucket`] that stops admitting anything for a while once both
/// tiers have been exhausted `fail_threshold` times in a row.
///
/// While the breaker is open every attempt fails without touching either
/// tier or the failure count. The count is reset when the breaker trips, so
/// a fresh run of failures is needed to trip it again after the window.
#[derive(Debug)]
pub struct BreakerBucket {
    tiers: TieredBucket,
    fail_threshold: u32,
    reject_duration: Duration,
    state: Mutex<BreakerState>,
}

impl BreakerBucket {
    pub fn new(tiers: TieredBucket, fail_threshold: u32, reject_duration: Duration) -> Self {
        Self {
            tiers,
            fail_threshold,
            reject_duration,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Try to admit one unit of work.
    pub fn try_take(&self) -> bool {
        if self.is_rejected() {
            return false;
        }

        if self.tiers.try_take() {
            self.state.lock().fail_count = 0;
            return true;
        }

        let mut state = self.state.lock();
        state.fail_count += 1;
        if state.fail_count >= self.fail_threshold {
            let until = Instant::now() + self.reject_duration;
            debug!(
                failures = state.fail_count,
                reject_ms = self.reject_duration.as_millis() as u64,
                "Circuit breaker tripped"
            );
            state.reject_until = Some(until);
            state.fail_count = 0;
        }
        false
    }

    /// Whether the breaker is currently rejecting everything.
    pub fn is_rejected(&self) -> bool {
        self.state.lock().is_open(Instant::now())
    }

    /// Close the breaker and forget all recorded failures.
    pub fn reset_reject(&self) {
        let mut state = self.state.lock();
        state.reject_until = None;
        state.fail_count = 0;
    }

    /// Consecutive failures recorded since the last success or trip.
    pub fn fail_count(&self) -> u32 {
        self.state.lock().fail_count
    }

    /// Current token levels as `(stable, burst)`.
    pub fn status(&self) -> (f64, f64) {
        self.tiers.status()
    }

    pub fn tiers(&self) -> &TieredBucket {
        &self.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn empty_breaker(fail_threshold: u32, reject_duration: Duration) -> BreakerBucket {
        BreakerBucket::new(TieredBucket::new(0.0, 0.0, 0.0, 0.0), fail_threshold, reject_duration)
    }

    #[test]
    fn test_trips_after_threshold() {
        let breaker = empty_breaker(3, Duration::from_secs(1));

        assert!(!breaker.try_take());
        assert!(!breaker.try_take());
        assert!(!breaker.is_rejected());
        assert_eq!(breaker.fail_count(), 2);

        assert!(!breaker.try_take());
        assert!(breaker.is_rejected());
        // Tripping resets the failure count
        assert_eq!(breaker.fail_count(), 0);
    }

    #[test]
    fn test_open_window_does_not_count_failures() {
        let breaker = empty_breaker(2, Duration::from_secs(5));
        breaker.try_take();
        breaker.try_take();
        assert!(breaker.is_rejected());

        for _ in 0..10 {
            assert!(!breaker.try_take());
        }
        assert_eq!(breaker.fail_count(), 0);
    }

    #[test]
    fn test_open_window_leaves_tiers_untouched() {
        let breaker = BreakerBucket::new(
            TieredBucket::new(1.0, 0.0, 0.0, 0.0),
            1,
            Duration::from_secs(5),
        );
        assert!(breaker.try_take());
        assert!(!breaker.try_take());
        assert!(breaker.is_rejected());

        // Refill the stable tier while the breaker is open
        breaker.tiers().stable().set_rate(1000.0);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(breaker.tiers().stable().tokens(), 1.0);

        assert!(!breaker.try_take());
        assert_eq!(breaker.status(), (1.0, 0.0));
    }

    #[test]
    fn test_recovers_after_reject_window() {
        // Both tiers start empty and the stable tier refills slowly
        let breaker = BreakerBucket::new(
            TieredBucket::new(1.0, 2.0, 0.0, 0.0),
            3,
            Duration::from_secs(1),
        );
        assert!(breaker.tiers().stable().take_one());

        for _ in 0..3 {
            assert!(!breaker.try_take());
        }
        assert!(breaker.is_rejected());

        thread::sleep(Duration::from_millis(1100));
        assert!(!breaker.is_rejected());
        assert!(breaker.try_take());
    }

    #[test]
    fn test_success_resets_fail_count() {
        let breaker = BreakerBucket::new(
            TieredBucket::new(1.0, 0.0, 0.0, 0.0),
            5,
            Duration::from_secs(1),
        );
        assert!(breaker.try_take());
        assert!(!breaker.try_take());
        assert!(!breaker.try_take());
        assert_eq!(breaker.fail_count(), 2);

        breaker.tiers().stable().set_rate(1000.0);
        thread::sleep(Duration::from_millis(10));
        assert!(breaker.try_take());
        assert_eq!(breaker.fail_count(), 0);
    }

    #[test]
    fn test_reset_reject() {
        let breaker = empty_breaker(1, Duration::from_secs(60));
        breaker.try_take();
        assert!(breaker.is_rejected());

        breaker.reset_reject();
        assert!(!breaker.is_rejected());
        assert_eq!(breaker.fail_count(), 0);
    }

    #[test]
    fn test_zero_threshold_trips_on_first_failure() {
        let breaker = empty_breaker(0, Duration::from_secs(1));
        assert!(!breaker.try_take());
        assert!(breaker.is_rejected());
    }
}
