//! Double-buffered continuous reception
//!
//! The producer (DMA or an ISR) fills slot `active` while the consumer reads
//! slot `!active`. On completion the producer records the length, retargets
//! (`active ^= 1`, sequence += 1) and re-arms; the completion event is set
//! after that, so a woken consumer finds the finished slot at `!active`.
//!
//! A slow consumer can still be overtaken: two more completions retarget the
//! producer onto the slot being copied. The consumer samples the sequence
//! counter around the copy and retries when it moved, and gives up with
//! [`OsalError::Error`] rather than return a torn copy.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::osal::{OsalError, OsalResult};

/// Copies attempted before a read is reported as torn
pub const READ_RETRIES: usize = 4;

/// Reception target handed to peripheral glue
///
/// Points into a [`DoubleBuffer`] slot and stays valid until the reception
/// completes, fails or is aborted.
#[derive(Debug)]
pub struct RxSlot<T> {
    ptr: NonNull<T>,
    len: usize,
}

impl<T> Clone for RxSlot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RxSlot<T> {}

// SAFETY: the slot is written by exactly one producer at a time.
unsafe impl<T: Send> Send for RxSlot<T> {}

impl<T> RxSlot<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// View the slot as a slice
    ///
    /// # Safety
    /// The caller must be the producer of an outstanding reception into this
    /// slot, and the reception must not have completed or been aborted.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [T] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[derive(Clone, Copy)]
struct BufState {
    active: usize,
    lens: [usize; 2],
    seq: u32,
}

impl BufState {
    const INIT: Self = BufState {
        active: 0,
        lens: [0; 2],
        seq: 0,
    };

    #[inline]
    fn ready(&self) -> usize {
        self.active ^ 1
    }
}

pub struct DoubleBuffer<T, const N: usize> {
    slots: [UnsafeCell<[T; N]>; 2],
    state: CsCell<BufState>,
}

// SAFETY: slot contents are only written through `RxSlot` by one producer,
// the bookkeeping lives in a `CsCell`.
unsafe impl<T: Send, const N: usize> Sync for DoubleBuffer<T, N> {}

impl<T: Copy, const N: usize> DoubleBuffer<T, N> {
    pub const fn new(fill: T) -> Self {
        DoubleBuffer {
            slots: [UnsafeCell::new([fill; N]), UnsafeCell::new([fill; N])],
            state: CsCell::new(BufState::INIT),
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Forget both slots' contents and point the producer at slot 0
    pub fn reset(&self) {
        self.state.with(|s| *s = BufState::INIT);
    }

    /// Slot the producer writes
    pub fn active(&self) -> usize {
        self.state.with(|s| s.active)
    }

    /// Number of retargets since the last reset
    pub fn sequence(&self) -> u32 {
        self.state.with(|s| s.seq)
    }

    /// Length of the last completed reception
    pub fn ready_len(&self) -> usize {
        self.state.with(|s| s.lens[s.ready()])
    }

    fn slot(&self, index: usize, len: usize) -> RxSlot<T> {
        let base = self.slots[index].get() as *mut T;
        RxSlot {
            // SAFETY: derived from a live UnsafeCell.
            ptr: unsafe { NonNull::new_unchecked(base) },
            len: len.min(N),
        }
    }

    /// Target for the next reception, `len` items long
    pub fn producer_slot(&self, len: usize) -> RxSlot<T> {
        let active = self.active();
        self.slot(active, len)
    }

    /// Record a finished reception of `len` items and retarget
    ///
    /// Returns the target for re-arming, `next_len` items long.
    pub fn complete(&self, len: usize, next_len: usize) -> RxSlot<T> {
        let next = self.state.with(|s| {
            s.lens[s.active] = len.min(N);
            s.active ^= 1;
            s.seq = s.seq.wrapping_add(1);
            s.active
        });
        self.slot(next, next_len)
    }

    /// Slot used by blocking receivers, which never retarget
    pub fn dedicated(&self, len: usize) -> RxSlot<T> {
        let ready = self.state.with(|s| s.ready());
        self.slot(ready, len)
    }

    /// Record the length of a blocking reception into [`dedicated`](Self::dedicated)
    pub fn commit_dedicated(&self, len: usize) {
        self.state.with(|s| {
            let ready = s.ready();
            s.lens[ready] = len.min(N);
        });
    }

    /// Copy the last completed reception into `out`
    ///
    /// Returns the number of items copied, at most `out.len()`.
    pub fn read(&self, out: &mut [T]) -> OsalResult<usize> {
        for _ in 0..READ_RETRIES {
            let (seq, index, len) = self.state.with(|s| (s.seq, s.ready(), s.lens[s.ready()]));
            let n = len.min(out.len());

            let src = self.slots[index].get() as *const T;
            for (i, dst) in out[..n].iter_mut().enumerate() {
                // SAFETY: `i < n <= N`; volatile because the producer may be
                // retargeted onto this slot while we copy.
                *dst = unsafe { core::ptr::read_volatile(src.add(i)) };
            }

            if self.sequence() == seq {
                return Ok(n);
            }
            crate::debug!("double buffer overtaken, retrying read");
        }

        crate::warn!("double buffer read torn after {} tries", READ_RETRIES);
        Err(OsalError::Error)
    }

    /// One item of the last completed reception
    pub fn read_at(&self, index: usize) -> OsalResult<T> {
        if index >= N {
            return Err(OsalError::InvalidParam);
        }
        for _ in 0..READ_RETRIES {
            let (seq, slot) = self.state.with(|s| (s.seq, s.ready()));
            let src = self.slots[slot].get() as *const T;
            // SAFETY: `index < N`.
            let value = unsafe { core::ptr::read_volatile(src.add(index)) };
            if self.sequence() == seq {
                return Ok(value);
            }
        }
        Err(OsalError::Error)
    }
}
