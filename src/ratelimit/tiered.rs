//! Two-tier bucket: a stable tier backed by a burst tier.

use super::bucket::TokenBucket;

/// A stable bucket with a burst bucket behind it.
///
/// The burst tier is only consulted once the stable tier is empty, so short
/// spikes are absorbed without eating into the steady-state rate.
#[derive(Debug)]
pub struct TieredBucket {
    stable: TokenBucket,
    burst: TokenBucket,
}

impl TieredBucket {
    /// Create a two-tier bucket from the capacity and rate of each tier.
    pub fn new(stable_capacity: f64, stable_rate: f64, burst_capacity: f64, burst_rate: f64) -> Self {
        Self {
            stable: TokenBucket::new(stable_capacity, stable_rate),
            burst: TokenBucket::new(burst_capacity, burst_rate),
        }
    }

    /// Take one token, from the stable tier first and the burst tier second.
    pub fn try_take(&self) -> bool {
        self.stable.take_one() || self.burst.take_one()
    }

    /// Current token levels as `(stable, burst)`.
    pub fn status(&self) -> (f64, f64) {
        (self.stable.tokens(), self.burst.tokens())
    }

    pub fn stable(&self) -> &TokenBucket {
        &self.stable
    }

    pub fn burst(&self) -> &TokenBucket {
        &self.burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_tier_used_first() {
        let tiers = TieredBucket::new(2.0, 0.0, 3.0, 0.0);

        assert!(tiers.try_take());
        assert!(tiers.try_take());
        assert_eq!(tiers.status(), (0.0, 3.0));

        assert!(tiers.try_take());
        assert_eq!(tiers.status(), (0.0, 2.0));
    }

    #[test]
    fn test_both_tiers_exhausted() {
        let tiers = TieredBucket::new(1.0, 0.0, 1.0, 0.0);

        assert!(tiers.try_take());
        assert!(tiers.try_take());
        assert!(!tiers.try_take());
        assert_eq!(tiers.status(), (0.0, 0.0));
    }

    #[test]
    fn test_empty_stable_tier_falls_through() {
        let tiers = TieredBucket::new(0.0, 0.0, 2.0, 0.0);
        assert!(tiers.try_take());
        assert_eq!(tiers.stable().tokens(), 0.0);
        assert_eq!(tiers.burst().tokens(), 1.0);
    }
}
