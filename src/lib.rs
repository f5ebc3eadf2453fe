//! Floodgate - In-Process Admission Control
//!
//! This crate decides, for each unit of work, whether to run it now, hold it
//! in a bounded time-limited queue, or discard it. Admission goes through a
//! two-tier token bucket guarded by a circuit breaker, and a background
//! worker drains the queue under the same policy as live traffic.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::{FloodgateConfig, LimiterConfig};
pub use error::{FloodgateError, Result};
pub use ratelimit::{CompletionHandler, Limiter, LimiterSnapshot, Outcome};
