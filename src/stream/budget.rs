//! Byte-budget backpressure for stream buffers.
//!
//! Producers reserve the wire size of a frame before queueing it and the
//! consumer releases it once the frame leaves the queue. A producer that
//! cannot reserve waits for a release notification, re-checking at least
//! every [`BUFFER_WAIT`] so a stop request is observed promptly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Upper bound on any single blocking wait inside a stream.
pub const BUFFER_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct ByteBudget {
    used: AtomicUsize,
    capacity: usize,
    released: Notify,
}

impl ByteBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            capacity,
            released: Notify::new(),
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.capacity
    }

    /// Reserve `size` bytes if they fit. An empty budget always accepts, so a
    /// frame larger than the whole budget can still make progress.
    pub fn try_reserve(&self, size: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current == 0 || current + size <= self.capacity).then_some(current + size)
            })
            .is_ok()
    }

    /// Wait until `size` bytes are reserved. Returns false if `stopped` turns
    /// true first.
    pub async fn reserve(&self, size: usize, stopped: impl Fn() -> bool) -> bool {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if stopped() {
                return false;
            }
            if self.try_reserve(size) {
                return true;
            }
            let _ = tokio::time::timeout(BUFFER_WAIT, released).await;
        }
    }

    pub fn release(&self, size: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(size))
            });
        self.released.notify_waiters();
    }

    /// Wake every waiter so it can re-check its stop condition.
    pub fn wake_all(&self) {
        self.released.notify_waiters();
    }
}
