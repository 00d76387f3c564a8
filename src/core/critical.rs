//! Critical section handling
//!
//! The kernel and the registries share one nesting-aware critical section
//! built on the `critical-section` crate: on Cortex-M it masks interrupts
//! through PRIMASK, on the host it is the `std` implementation. Leaving a
//! section restores the state that was saved on entry, so sections may be
//! entered from task code, from interrupt handlers, and from inside each other.

use critical_section::RestoreState;

/// RAII guard for critical sections
///
/// Created by [`CriticalSection::enter`]. Dropping the guard restores the
/// interrupt state saved on entry.
pub struct CriticalSection {
    restore: RestoreState,
}

impl CriticalSection {
    /// Enter a critical section.
    #[inline(always)]
    pub fn enter() -> Self {
        // SAFETY: the matching release happens in `Drop`, and guards are
        // dropped in reverse order of creation because they are never moved
        // out of the scope that created them.
        let restore = unsafe { critical_section::acquire() };
        CriticalSection { restore }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        // SAFETY: `restore` came from the matching `acquire` in `enter`.
        unsafe { critical_section::release(self.restore) };
    }
}

/// Execute a closure inside a critical section
///
/// The closure receives the guard, which unlocks [`CsCell`] protected data.
///
/// [`CsCell`]: crate::core::cs_cell::CsCell
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(all(not(target_arch = "arm"), feature = "host"))]
    {
        crate::osal::host::in_simulated_isr()
    }

    #[cfg(all(not(target_arch = "arm"), not(feature = "host")))]
    {
        false
    }
}
