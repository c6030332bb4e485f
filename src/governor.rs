//! Resource Governor
//!
//! Bounds the work the server takes on so the process stays under its
//! memory ceiling.
//!
//! ## Responsibilities
//! - Count admitted / rejected requests
//! - Hand out worker slots: at most `worker_threads` engine calls run at
//!   once, later arrivals wait in arrival order and count as queued
//! - Hand out byte reservations against `max_buffered_bytes`
//!
//! The admission bound itself (`worker_threads + queue_depth`) is enforced
//! by the load-shedding layer in `network::server`; the governor runs
//! admitted work and keeps the books.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, StrataError};

/// Shared admission, worker and byte-budget accounting
#[derive(Debug)]
pub struct Governor {
    /// Ceiling for `buffered_bytes`
    max_buffered_bytes: usize,
    buffered_bytes: AtomicUsize,
    /// One permit per worker; tokio's semaphore is fair, so waiters are
    /// served in arrival order
    workers: Arc<Semaphore>,
    admitted: AtomicU64,
    rejected: AtomicU64,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Point-in-time copy of the governor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GovernorStats {
    pub admitted: u64,
    pub rejected: u64,
    pub queued: usize,
    pub in_flight: usize,
    pub buffered_bytes: usize,
}

impl Governor {
    pub fn new(worker_threads: usize, max_buffered_bytes: usize) -> Self {
        Self {
            max_buffered_bytes,
            buffered_bytes: AtomicUsize::new(0),
            workers: Arc::new(Semaphore::new(worker_threads)),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Reserve `bytes` of the buffer budget
    ///
    /// Returns `None` when the reservation would exceed the budget. The
    /// bytes are returned when the permit is dropped.
    pub fn try_reserve(self: &Arc<Self>, bytes: usize) -> Option<BytePermit> {
        let reserved = self
            .buffered_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|&total| total <= self.max_buffered_bytes)
            })
            .is_ok();

        if reserved {
            Some(BytePermit {
                governor: Arc::clone(self),
                bytes,
            })
        } else {
            tracing::debug!(
                "Byte budget exhausted: wanted {}, {} of {} in use",
                bytes,
                self.buffered_bytes.load(Ordering::Relaxed),
                self.max_buffered_bytes
            );
            None
        }
    }

    /// A request got past the load shedder
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Work was turned away (capacity or byte budget exhausted)
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Wait for a free worker
    ///
    /// The caller counts as queued while waiting and as in flight while it
    /// holds the returned slot.
    pub async fn acquire_worker(self: &Arc<Self>) -> Result<WorkerSlot> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        let waiting = Queued { governor: self };
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| StrataError::Internal("worker pool closed".to_string()))?;
        drop(waiting);

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(WorkerSlot {
            governor: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Run a blocking engine call on a worker
    ///
    /// The slot moves into the blocking task, so a caller that gives up
    /// (client gone) does not free the worker before the call returns.
    pub async fn run_blocking<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.acquire_worker().await?;
        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            f()
        })
        .await
        .map_err(|e| StrataError::Internal(format!("worker task failed: {}", e)))?
    }

    pub fn max_buffered_bytes(&self) -> usize {
        self.max_buffered_bytes
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Acquire),
            in_flight: self.in_flight.load(Ordering::Acquire),
            buffered_bytes: self.buffered_bytes.load(Ordering::Acquire),
        }
    }
}

/// A reservation against the byte budget, released on drop
#[derive(Debug)]
pub struct BytePermit {
    governor: Arc<Governor>,
    bytes: usize,
}

impl BytePermit {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Give back everything above `bytes`; never grows the reservation
    pub fn shrink(&mut self, bytes: usize) {
        if bytes < self.bytes {
            self.governor
                .buffered_bytes
                .fetch_sub(self.bytes - bytes, Ordering::AcqRel);
            self.bytes = bytes;
        }
    }
}

impl Drop for BytePermit {
    fn drop(&mut self) {
        self.governor
            .buffered_bytes
            .fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Counts a waiter as queued; also covers a waiter whose future is dropped
struct Queued<'a> {
    governor: &'a Governor,
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.governor.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Holds one worker and counts it as in flight, released on drop
#[derive(Debug)]
pub struct WorkerSlot {
    governor: Arc<Governor>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.governor.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
