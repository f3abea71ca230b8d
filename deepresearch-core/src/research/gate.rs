//! Capacity-bounded admission control for retrieval/extraction units.
//!
//! Backed by `tokio::sync::Semaphore`, which hands out permits in FIFO order.
//! A [`GatePermit`] releases its slot on drop, so every exit path (success,
//! error, panic unwinding, or a dropped future) gives the slot back.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting limiter shared by every branch of one traversal.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Scoped admission. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` holders (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a slot unless `cancel` fires first.
    ///
    /// Returns `None` when cancelled, even if a slot became free at the same
    /// moment, so queued work never starts after cancellation.
    pub async fn acquire_or_cancel(&self, cancel: &CancellationToken) -> Option<GatePermit> {
        if cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                Some(self.admit(permit))
            }
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        GatePermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of permits ever held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}
