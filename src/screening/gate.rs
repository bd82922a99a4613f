//! Bounded-admission gate for rate-limited calls.
//!
//! A counting semaphore plus a fixed pacing delay: at most `capacity`
//! holders at once, and every admission waits `pacing` before the
//! holder may dispatch. The slot is tied to a [`GatePermit`] guard, so
//! it is released on every exit path (success, error, timeout, or the
//! future being dropped).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::types::ScreenError;

pub struct Gate {
    semaphore: Semaphore,
    capacity: usize,
    pacing: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// An admitted slot. Dropping it frees the slot.
pub struct GatePermit<'a> {
    gate: &'a Gate,
    _permit: SemaphorePermit<'a>,
}

impl Gate {
    pub fn new(capacity: usize, pacing: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            pacing,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot, then wait out the pacing delay.
    pub async fn acquire(&self) -> Result<GatePermit<'_>, ScreenError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ScreenError::Transient("admission gate closed".into()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let guard = GatePermit {
            gate: self,
            _permit: permit,
        };

        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }

        Ok(guard)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
