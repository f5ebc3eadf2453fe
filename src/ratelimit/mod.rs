//! Admission control: token buckets, circuit breaker, wait queue and the
//! limiter that ties them together.

mod breaker;
mod bucket;
mod handler;
mod limiter;
mod queue;
mod tiered;

pub use breaker::BreakerBucket;
pub use bucket::TokenBucket;
pub use handler::CompletionHandler;
pub use limiter::{Limiter, LimiterSnapshot, Outcome};
pub use queue::TimedQueue;
pub use tiered::TieredBucket;
