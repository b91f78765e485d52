//! Admission control: the global bound on in-flight model calls.
//!
//! Every outbound call across all personas takes a [`CallSlot`] first. The
//! default of one slot suits a single local backend. Waiters are served in FIFO order; a slot is returned
//! when it is dropped, whatever the outcome of the call.

use chorus_core::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionController {
    /// A controller with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<CallSlot, Error> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("admission controller closed".into()))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(in_flight = now, capacity = self.capacity, "Call slot acquired");
        Ok(CallSlot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// One held slot. Released on drop.
pub struct CallSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for CallSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
