//! Capacity-1 hand-off between the acquisition loop and one worker.
//!
//! The slot holds at most one item. A put into an occupied slot is refused
//! and the item handed back to the caller; it never overwrites and never
//! queues. The consumer therefore always sees the freshest frame the
//! producer managed to deliver, and memory stays bounded by one frame per
//! stream no matter how slow the consumer is.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::frame::Frame;

pub struct HandoffSlot<T = Frame> {
    item: Mutex<Option<T>>,
    filled: Condvar,
}

impl<T> HandoffSlot<T> {
    pub fn new() -> Self {
        Self {
            item: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    // The guarded value is a plain `Option`, always in a valid state, so a
    // panic elsewhere while holding the lock does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.item.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `item` if the slot is empty. When occupied, the existing item is
    /// left untouched and `item` comes back as `Err`.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(item);
        }
        *slot = Some(item);
        drop(slot);
        self.filled.notify_one();
        Ok(())
    }

    /// Remove and return the stored item, if any. Never waits.
    pub fn try_take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Like `try_take`, but idles up to `timeout` for an item to arrive.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let slot = self.lock();
        let (mut slot, _) = self
            .filled
            .wait_timeout_while(slot, timeout, |item| item.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }

    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
