//! Critical section protected cell
//!
//! Interior mutability for state shared between tasks and interrupt
//! handlers: the kernel's scheduler tables and every registry's slot arena.

use core::cell::UnsafeCell;

use crate::critical::{critical_section, CriticalSection};

/// A cell that can only be accessed within a critical section.
pub struct CsCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Mutable access while the caller holds a critical section.
    ///
    /// The returned reference must not outlive `_cs` and must not be
    /// obtained twice at the same time.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn get<'cs>(&'cs self, _cs: &'cs CriticalSection) -> &'cs mut T {
        unsafe { &mut *self.0.get() }
    }

    /// Run `f` on the contents inside a fresh critical section.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(self.get(cs)))
    }

    /// Mutable access without a guard.
    ///
    /// # Safety
    /// Interrupts must already be masked by the caller and no other
    /// reference to the contents may be live.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_unchecked(&self) -> &mut T {
        unsafe { &mut *self.0.get() }
    }
}
