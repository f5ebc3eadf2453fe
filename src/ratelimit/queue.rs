//! Bounded FIFO wait queue whose items expire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{futures::Notified, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{FloodgateError, Result};

/// A queued payload and the instant it stops being worth processing.
#[derive(Debug)]
struct QueueItem<T> {
    payload: T,
    expire_at: Instant,
}

impl<T> QueueItem<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expire_at <= now
    }
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<QueueItem<T>>,
    /// Maximum length, 0 for unbounded
    max_len: usize,
}

/// A FIFO queue of deferred payloads, each with its own time-to-live.
///
/// Expired items are dropped lazily by [`dequeue`](Self::dequeue) and
/// eagerly by a periodic sweep started with
/// [`start_cleanup`](Self::start_cleanup). All access goes through one lock.
#[derive(Debug)]
pub struct TimedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    /// Items dropped because they expired
    expired: AtomicU64,
    /// Woken on every successful enqueue
    notify: Notify,
    shutdown: watch::Sender<bool>,
}

impl<T> TimedQueue<T> {
    /// Create a queue holding at most `max_len` items (0 = unbounded).
    pub fn new(max_len: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                max_len,
            }),
            expired: AtomicU64::new(0),
            notify: Notify::new(),
            shutdown,
        }
    }

    /// Append a payload that expires `ttl` from now.
    ///
    /// Fails with [`FloodgateError::QueueFull`] when the queue is bounded
    /// and already at its maximum length.
    pub fn enqueue(&self, payload: T, ttl: Duration) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.max_len > 0 && inner.items.len() >= inner.max_len {
                return Err(FloodgateError::QueueFull {
                    max_len: inner.max_len,
                });
            }

            inner.items.push_back(QueueItem {
                payload,
                expire_at: Instant::now() + ttl,
            });
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Pop the first item that has not expired yet.
    ///
    /// Expired items at the head are discarded on the way. Never waits for
    /// new arrivals; returns `None` when nothing live is queued.
    pub fn dequeue(&self) -> Option<T> {
        let now = Instant::now();
        let mut dropped = 0u64;

        let payload = {
            let mut inner = self.inner.lock();
            loop {
                match inner.items.pop_front() {
                    Some(item) if item.is_expired(now) => dropped += 1,
                    Some(item) => break Some(item.payload),
                    None => break None,
                }
            }
        };

        if dropped > 0 {
            self.expired.fetch_add(dropped, Ordering::Relaxed);
            trace!(dropped, "Dropped expired items at queue head");
        }
        payload
    }

    /// Remove every expired item, wherever it sits in the queue.
    ///
    /// Returns the number of items removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.items.len();
            inner.items.retain(|item| !item.is_expired(now));
            before - inner.items.len()
        };

        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Number of queued items, including any that expired but were not
    /// swept yet.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.inner.lock().max_len
    }

    /// Total items dropped because they expired.
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// Future that resolves after the next successful enqueue, or at once
    /// if an enqueue happened since the last wake-up was consumed.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Stop the background sweep.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

impl<T: Send + 'static> TimedQueue<T> {
    /// Spawn the periodic sweep that purges expired items every `interval`
    /// until [`stop`](Self::stop) is called.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = queue.purge_expired();
                        if removed > 0 {
                            debug!(removed, remaining = queue.len(), "Swept expired queue items");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            trace!("Queue cleanup task stopped");
        })
    }
}
