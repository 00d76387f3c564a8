//! Fixed-capacity message queue
//!
//! Two counting semaphores track free and filled slots; the ring itself is
//! guarded by a short critical section. Built only on the [`Osal`] contract,
//! so it behaves the same on every backend.

use heapless::Deque;

use crate::core::cs_cell::CsCell;

use super::{Osal, OsalError, OsalResult, OsalSemaphore, Tick, NO_WAIT};

pub struct MessageQueue<B: Osal, T: Copy, const N: usize> {
    /// Free slots
    slots: B::Semaphore,
    /// Queued messages
    items: B::Semaphore,
    ring: CsCell<Deque<T, N>>,
}

impl<B: Osal, T: Copy + Send, const N: usize> MessageQueue<B, T, N> {
    pub const fn new() -> Self {
        MessageQueue {
            slots: <B::Semaphore as OsalSemaphore>::INIT,
            items: <B::Semaphore as OsalSemaphore>::INIT,
            ring: CsCell::new(Deque::new()),
        }
    }

    pub fn create(&self, name: &'static str) -> OsalResult {
        if N > u32::MAX as usize {
            return Err(OsalError::InvalidParam);
        }

        self.slots.create(name, N as u32)?;
        if let Err(e) = self.items.create(name, 0) {
            let _ = self.slots.delete();
            return Err(e);
        }
        self.ring.with(|ring| ring.clear());
        Ok(())
    }

    /// Queue `msg`, waiting up to `timeout` ticks for a free slot
    pub fn send(&self, msg: T, timeout: Tick) -> OsalResult {
        self.slots.wait(timeout)?;
        self.push(msg)?;
        self.items.post()
    }

    /// Queue `msg` from an interrupt handler; a full queue is `Timeout`
    pub fn send_from_isr(&self, msg: T) -> OsalResult {
        self.slots.wait(NO_WAIT)?;
        self.push(msg)?;
        self.items.post_from_isr()
    }

    /// Take the oldest message, waiting up to `timeout` ticks
    pub fn recv(&self, timeout: Tick) -> OsalResult<T> {
        self.items.wait(timeout)?;
        let msg = self.ring.with(|ring| ring.pop_front()).ok_or(OsalError::Error)?;
        self.slots.post()?;
        Ok(msg)
    }

    pub fn len(&self) -> usize {
        self.ring.with(|ring| ring.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete both semaphores and drop queued messages
    pub fn delete(&self) -> OsalResult {
        let slots = self.slots.delete();
        let items = self.items.delete();
        self.ring.with(|ring| ring.clear());
        slots.and(items)
    }

    fn push(&self, msg: T) -> OsalResult {
        // A slot was reserved, so the ring has room.
        self.ring
            .with(|ring| ring.push_back(msg))
            .map_err(|_| OsalError::Error)
    }
}

impl<B: Osal, T: Copy + Send, const N: usize> Default for MessageQueue<B, T, N> {
    fn default() -> Self {
        Self::new()
    }
}
