use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::trace;

/// Result of a single wait on a [`Rendezvous`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// An item was present and has been taken.
    Arrived(T),
    /// Woken up without an item while the deadline is still ahead.
    Continue,
    /// The deadline has passed without an item.
    TimedOut,
}

/// A single slot handed over between a producing thread and a consuming thread. The producer
/// [`offer`](Rendezvous::offer)s an item, the consumer waits for it with a deadline. At most
/// one item is ever stored, a second offer is rejected until the slot has been emptied.
#[derive(Debug)]
pub struct Rendezvous<T> {
    slot: Mutex<Option<T>>,
    arrived: Condvar,
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            arrived: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `item` and wakes a waiting consumer. If the slot is occupied, `item` is handed
    /// back and the stored item is left untouched.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(item);
        }
        *slot = Some(item);
        drop(slot);
        self.arrived.notify_one();
        Ok(())
    }

    /// Waits once for an item until `deadline`. A wake-up without an item before the deadline
    /// is reported as [`WaitOutcome::Continue`], callers loop on it.
    pub fn wait_once(&self, deadline: Instant) -> WaitOutcome<T> {
        let mut slot = self.lock();
        if let Some(item) = slot.take() {
            return WaitOutcome::Arrived(item);
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        let (mut slot, result) = self
            .arrived
            .wait_timeout(slot, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(item) = slot.take() {
            WaitOutcome::Arrived(item)
        } else if result.timed_out() || Instant::now() >= deadline {
            WaitOutcome::TimedOut
        } else {
            trace!("spurious wake-up on rendezvous");
            WaitOutcome::Continue
        }
    }

    /// Waits up to `timeout` for an item and takes it.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.wait_once(deadline) {
                WaitOutcome::Arrived(item) => return Some(item),
                WaitOutcome::Continue => continue,
                WaitOutcome::TimedOut => return None,
            }
        }
    }

    /// Takes the item if one is present, without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Empties the slot and returns what was in it.
    pub fn clear(&self) -> Option<T> {
        self.try_take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}
