//! Admission-control limiter: immediate admission, deferred queue, or discard.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::breaker::BreakerBucket;
use super::handler::{Completion, CompletionHandler};
use super::queue::TimedQueue;
use super::tiered::TieredBucket;
use crate::config::LimiterConfig;
use crate::error::{FloodgateError, Result};

/// Upper bound on the worker's idle poll, whatever the configured interval.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Pause between checks while a dequeued item waits out an open breaker.
const BREAKER_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Result of submitting a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Admitted immediately; the completion runs right away
    Taken,
    /// Parked in the wait queue for the worker to admit later
    Queued,
    /// Dropped because the breaker is open or the queue is full
    Discarded,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Taken => write!(f, "taken"),
            Outcome::Queued => write!(f, "queued"),
            Outcome::Discarded => write!(f, "discarded"),
        }
    }
}

/// Point-in-time view of a limiter's state.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub stable_tokens: f64,
    pub burst_tokens: f64,
    pub queue_len: usize,
    pub rejected: bool,
    pub fail_count: u32,
    /// Submissions admitted immediately
    pub taken: u64,
    /// Submissions parked in the queue
    pub queued: u64,
    /// Submissions dropped at submit time
    pub discarded: u64,
    /// Queued items later admitted by the worker
    pub admitted: u64,
    /// Queued items dropped because their TTL ran out
    pub expired: u64,
}

#[derive(Debug, Default)]
struct Counters {
    taken: AtomicU64,
    queued: AtomicU64,
    discarded: AtomicU64,
    admitted: AtomicU64,
}

/// State shared between submitters and the worker task.
struct Shared<T: Send + 'static> {
    config: LimiterConfig,
    bucket: BreakerBucket,
    queue: Arc<TimedQueue<T>>,
    completion: OnceLock<Completion<T>>,
    runtime: OnceLock<Handle>,
    counters: Counters,
}

impl<T: Send + 'static> Shared<T> {
    /// Run the completion for an admitted payload without blocking the caller.
    fn complete(&self, payload: T) {
        let Some(completion) = self.completion.get() else {
            return;
        };

        match self.runtime.get().cloned().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => completion.dispatch(&runtime, payload),
            None => warn!("No Tokio runtime available, completion skipped"),
        }
    }
}

/// An admission-control limiter over payloads of type `T`.
///
/// [`submit`](Self::submit) never blocks: a payload is either admitted at
/// once, parked in a bounded queue, or discarded. After
/// [`start`](Self::start), a single worker task drains the queue in FIFO
/// order against the same breaker-guarded bucket, and a sweep task drops
/// expired queue items.
pub struct Limiter<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> fmt::Debug for Limiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("config", &self.shared.config)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T: Send + 'static> Limiter<T> {
    /// Create a limiter. Background tasks are not running until `start`.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        config.validate()?;

        let tiers = TieredBucket::new(
            config.stable_capacity,
            config.stable_rate,
            config.burst_capacity,
            config.burst_rate,
        );
        let bucket = BreakerBucket::new(tiers, config.fail_threshold, config.reject_duration());
        let queue = Arc::new(TimedQueue::new(config.queue_max_len));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                bucket,
                queue,
                completion: OnceLock::new(),
                runtime: OnceLock::new(),
                counters: Counters::default(),
            }),
            started: AtomicBool::new(false),
            shutdown,
            worker: Mutex::new(None),
            cleanup: Mutex::new(None),
        })
    }

    /// Register a closure run once per admitted payload.
    ///
    /// The closure runs on Tokio's blocking pool, possibly many at a time.
    pub fn set_completion_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.set_completion(Completion::Blocking(Arc::new(callback)))
    }

    /// Register an async handler run once per admitted payload.
    pub fn set_completion_handler<H>(&self, handler: H) -> Result<()>
    where
        H: CompletionHandler<T> + 'static,
    {
        self.set_completion(Completion::Async(Arc::new(handler)))
    }

    fn set_completion(&self, completion: Completion<T>) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(FloodgateError::AlreadyStarted);
        }
        self.shared
            .completion
            .set(completion)
            .map_err(|_| FloodgateError::CallbackAlreadySet)
    }

    /// Spawn the worker and the queue sweep on the current Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| FloodgateError::Runtime(e.to_string()))?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FloodgateError::AlreadyStarted);
        }
        let _ = self.shared.runtime.set(runtime.clone());

        let cleanup = self
            .shared
            .queue
            .start_cleanup(self.shared.config.queue_cleanup_interval());
        *self.cleanup.lock() = Some(cleanup);

        let worker = runtime.spawn(run_worker(Arc::clone(&self.shared), self.shutdown.subscribe()));
        *self.worker.lock() = Some(worker);

        info!(
            stable_capacity = self.shared.config.stable_capacity,
            burst_capacity = self.shared.config.burst_capacity,
            queue_max_len = self.shared.config.queue_max_len,
            "Limiter started"
        );
        Ok(())
    }

    /// Signal the worker and the queue sweep to stop, then wait for the
    /// worker to exit.
    ///
    /// A dequeued item still waiting for a token is abandoned. Calling
    /// `stop` again, or on a limiter that never started, does nothing.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        self.shared.queue.stop();

        let worker = self.worker.lock().take();
        let cleanup = self.cleanup.lock().take();
        if worker.is_none() && cleanup.is_none() {
            return;
        }

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Limiter worker exited abnormally");
            }
        }
        if let Some(cleanup) = cleanup {
            if let Err(e) = cleanup.await {
                warn!(error = %e, "Queue cleanup task exited abnormally");
            }
        }

        info!(queue_len = self.shared.queue.len(), "Limiter stopped");
    }

    /// Submit a payload for admission.
    pub fn submit(&self, payload: T) -> Outcome {
        let shared = &self.shared;
        let counters = &shared.counters;

        if shared.bucket.is_rejected() {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            trace!(outcome = %Outcome::Discarded, "Breaker open");
            return Outcome::Discarded;
        }

        if shared.bucket.try_take() {
            counters.taken.fetch_add(1, Ordering::Relaxed);
            trace!(outcome = %Outcome::Taken, "Admitted immediately");
            shared.complete(payload);
            return Outcome::Taken;
        }

        match shared.queue.enqueue(payload, shared.config.queue_item_ttl()) {
            Ok(()) => {
                counters.queued.fetch_add(1, Ordering::Relaxed);
                trace!(outcome = %Outcome::Queued, "Deferred to queue");
                Outcome::Queued
            }
            Err(e) => {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, outcome = %Outcome::Discarded, "Enqueue failed");
                Outcome::Discarded
            }
        }
    }

    /// Whether the breaker is currently rejecting everything.
    pub fn is_rejected(&self) -> bool {
        self.shared.bucket.is_rejected()
    }

    /// Close the breaker and forget recorded failures.
    pub fn reset_reject(&self) {
        self.shared.bucket.reset_reject();
    }

    /// Number of items currently queued.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.shared.config
    }

    /// Capture tier levels, queue length, breaker state and counters.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let shared = &self.shared;
        let (stable_tokens, burst_tokens) = shared.bucket.status();
        LimiterSnapshot {
            stable_tokens,
            burst_tokens,
            queue_len: shared.queue.len(),
            rejected: shared.bucket.is_rejected(),
            fail_count: shared.bucket.fail_count(),
            taken: shared.counters.taken.load(Ordering::Relaxed),
            queued: shared.counters.queued.load(Ordering::Relaxed),
            discarded: shared.counters.discarded.load(Ordering::Relaxed),
            admitted: shared.counters.admitted.load(Ordering::Relaxed),
            expired: shared.queue.expired_count(),
        }
    }
}

/// Sleep for `pause` unless shutdown is signalled first.
///
/// Returns `true` when the caller should stop.
async fn pause_or_shutdown(shutdown: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(pause) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Worker poll interval: the configured one, capped at [`MAX_POLL_INTERVAL`].
fn poll_interval(config: &LimiterConfig) -> Duration {
    config.worker_interval().min(MAX_POLL_INTERVAL)
}

/// Drain the queue in FIFO order, one item at a time.
async fn run_worker<T: Send + 'static>(shared: Arc<Shared<T>>, mut shutdown: watch::Receiver<bool>) {
    let idle = poll_interval(&shared.config);
    debug!(idle_ms = idle.as_millis() as u64, "Limiter worker running");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if shared.bucket.is_rejected() {
            if pause_or_shutdown(&mut shutdown, idle).await {
                break;
            }
            continue;
        }

        let Some(payload) = shared.queue.dequeue() else {
            tokio::select! {
                _ = shared.queue.notified() => {}
                _ = tokio::time::sleep(idle) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        if !admit_dequeued(&shared, &mut shutdown).await {
            debug!("Abandoning dequeued item on shutdown");
            break;
        }

        shared.counters.admitted.fetch_add(1, Ordering::Relaxed);
        trace!("Queued item admitted");
        shared.complete(payload);
    }

    debug!("Limiter worker exited");
}

/// Retry admission for one dequeued item until it gets a token.
///
/// Returns `false` if shutdown was signalled first. The token-wait timeout
/// is only reported, never enforced: the item keeps retrying.
async fn admit_dequeued<T: Send + 'static>(shared: &Shared<T>, shutdown: &mut watch::Receiver<bool>) -> bool {
    let config = &shared.config;
    let waiting_since = Instant::now();
    let mut overdue_logged = false;

    loop {
        if *shutdown.borrow() {
            return false;
        }

        let pause = if shared.bucket.is_rejected() {
            BREAKER_RETRY_PAUSE
        } else if shared.bucket.try_take() {
            return true;
        } else {
            config.retry_interval()
        };

        if !overdue_logged && waiting_since.elapsed() > config.token_wait_timeout() {
            warn!(
                waited_ms = waiting_since.elapsed().as_millis() as u64,
                timeout_ms = config.token_wait_timeout_ms,
                "Dequeued item still waiting for a token"
            );
            overdue_logged = true;
        }

        if pause_or_shutdown(shutdown, pause).await {
            return false;
        }
    }
}

impl<T: Send + 'static> Drop for Limiter<T> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.shared.queue.stop();
    }
}
