//! The hard cap on in-flight requests.
//!
//! A slot is taken at enqueue and released exactly once, when the request
//! first reaches a terminal status (not when it leaves the queue). Enqueue
//! beyond the limit is rejected synchronously, never queued or dropped.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ClientError;

/// Atomic counter of requests not yet in a terminal state.
#[derive(Debug)]
pub struct PendingGate {
    limit: usize,
    count: AtomicUsize,
}

impl PendingGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: AtomicUsize::new(0),
        }
    }

    /// Take one slot, or fail with `Capacity` when the limit is reached.
    pub fn try_acquire(&self) -> Result<(), ClientError> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| ClientError::Capacity { limit: self.limit })
    }

    /// Return one slot. Saturates at zero so a stray double release cannot
    /// wrap the counter.
    pub fn release(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drop all slots (teardown path).
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}
