//! Token bucket implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

/// Mutable part of a bucket, guarded by the bucket's lock.
#[derive(Debug)]
struct BucketState {
    /// Current tokens, fractional so slow rates still accumulate
    tokens: f64,
    /// Tokens added per second
    rate: f64,
    /// When tokens were last recomputed
    last_refill: Instant,
}

impl BucketState {
    /// Credit tokens for the time elapsed since the last refill.
    fn refill(&mut self, capacity: f64, now: Instant) {
        if self.rate <= 0.0 {
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let delta = elapsed * self.rate;
        if delta <= 0.0 {
            return;
        }

        self.tokens = (self.tokens + delta).min(capacity);
        self.last_refill = now;
    }
}

/// A refillable token bucket.
///
/// Tokens are never topped up by a ticking task; every access recomputes
/// them from the wall-clock time elapsed since the previous access, under
/// the bucket's own lock.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket. Negative capacity or rate is clamped to zero.
    pub fn new(capacity: f64, rate: f64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                rate: rate.max(0.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take `count` tokens.
    ///
    /// Returns `true` and removes the tokens if enough are available,
    /// otherwise returns `false` and leaves the bucket untouched. A
    /// non-positive count always succeeds.
    pub fn try_take(&self, count: f64) -> bool {
        if count <= 0.0 {
            return true;
        }

        let mut state = self.state.lock();
        state.refill(self.capacity, Instant::now());
        if state.tokens >= count {
            state.tokens -= count;
            true
        } else {
            false
        }
    }

    /// Take a single token.
    pub fn take_one(&self) -> bool {
        self.try_take(1.0)
    }

    /// Force a refill computation.
    pub fn refill(&self) {
        self.state.lock().refill(self.capacity, Instant::now());
    }

    /// Current token level, after refilling.
    pub fn tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(self.capacity, Instant::now());
        state.tokens
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Current refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Change the refill rate.
    ///
    /// Time elapsed so far is credited at the old rate before the new one
    /// takes effect.
    pub fn set_rate(&self, rate: f64) {
        let mut state = self.state.lock();
        state.refill(self.capacity, Instant::now());
        state.rate = rate.max(0.0);
    }

    /// Spawn a task that forces a refill every `interval` until `shutdown`
    /// flips to `true` or its sender is dropped.
    ///
    /// The bucket is correct without this task; it only keeps the observed
    /// level fresh for callers that read it without taking.
    pub fn spawn_auto_refill(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let bucket = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => bucket.refill(),
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            trace!("Auto-refill task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(5.0, 1.0);
        assert_eq!(bucket.capacity(), 5.0);
        assert!((bucket.tokens() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_rate_admits_capacity_then_fails() {
        let bucket = TokenBucket::new(5.0, 0.0);

        for _ in 0..5 {
            assert!(bucket.try_take(1.0));
        }

        // The 6th take should fail, and keep failing
        assert!(!bucket.try_take(1.0));
        thread::sleep(Duration::from_millis(20));
        assert!(!bucket.take_one());
    }

    #[test]
    fn test_fractional_capacity_floors() {
        let bucket = TokenBucket::new(2.5, 0.0);
        assert!(bucket.take_one());
        assert!(bucket.take_one());
        assert!(!bucket.take_one());
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_count_always_succeeds() {
        let bucket = TokenBucket::new(0.0, 0.0);
        assert!(bucket.try_take(0.0));
        assert!(bucket.try_take(-3.0));
        assert!(!bucket.try_take(1.0));
    }

    #[test]
    fn test_failed_take_leaves_tokens() {
        let bucket = TokenBucket::new(3.0, 0.0);
        assert!(!bucket.try_take(4.0));
        assert!((bucket.tokens() - 3.0).abs() < 1e-9);
        assert!(bucket.try_take(3.0));
    }

    #[test]
    fn test_negative_values_clamped() {
        let bucket = TokenBucket::new(-4.0, -1.0);
        assert_eq!(bucket.capacity(), 0.0);
        assert_eq!(bucket.rate(), 0.0);
        assert_eq!(bucket.tokens(), 0.0);
        assert!(!bucket.take_one());
    }

    #[test]
    fn test_refill_after_time() {
        let bucket = TokenBucket::new(10.0, 100.0);
        for _ in 0..10 {
            assert!(bucket.take_one());
        }
        assert!(!bucket.take_one());

        // 100 tokens/sec, 60ms is ~6 tokens
        thread::sleep(Duration::from_millis(60));
        assert!(bucket.take_one());
    }

    #[test]
    fn test_fractional_accumulation_preserved() {
        let bucket = TokenBucket::new(2.0, 5.0);
        assert!(bucket.try_take(2.0));

        // ~0.25 tokens: not enough yet, but the fraction is kept
        thread::sleep(Duration::from_millis(50));
        assert!(!bucket.take_one());

        thread::sleep(Duration::from_millis(200));
        assert!(bucket.take_one());
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(3.0, 1000.0);
        thread::sleep(Duration::from_millis(20));
        let tokens = bucket.tokens();
        assert!(tokens <= 3.0);
        assert!(tokens >= 0.0);
    }

    #[test]
    fn test_set_rate_does_not_credit_retroactively() {
        let bucket = TokenBucket::new(10.0, 0.0);
        assert!(bucket.try_take(10.0));

        thread::sleep(Duration::from_millis(50));
        bucket.set_rate(100.0);
        assert_eq!(bucket.rate(), 100.0);

        // Time spent at rate 0 earns nothing
        assert!(bucket.tokens() < 1.0);

        thread::sleep(Duration::from_millis(30));
        assert!(bucket.take_one());
    }

    #[test]
    fn test_concurrent_takes_never_overdraw() {
        let bucket = Arc::new(TokenBucket::new(100.0, 0.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                thread::spawn(move || (0..50).filter(|_| bucket.take_one()).count())
            })
            .collect();

        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken, 100);
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[tokio::test]
    async fn test_auto_refill_stops_on_shutdown() {
        let bucket = Arc::new(TokenBucket::new(1.0, 10.0));
        let (tx, rx) = watch::channel(false);

        let handle = bucket.spawn_auto_refill(Duration::from_millis(5), rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("auto-refill task did not stop")
            .unwrap();
    }
}
