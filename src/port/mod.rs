//! CPU port
//!
//! Context switching, the tick source and the cycle counter used for
//! microsecond delays.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Non-ARM targets only build the kernel for unit tests; nothing here ever
// switches context.
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use portable_atomic::{AtomicU32, Ordering};

    use crate::task::OsTaskFn;
    use crate::types::{OsOpt, OsStkElement};

    static CYCLES: AtomicU32 = AtomicU32::new(0);

    /// Nothing to switch to, so `os_start` returns
    pub unsafe fn os_start_high_rdy() {}

    pub fn os_ctx_sw() {}

    pub fn os_int_ctx_sw() {}

    pub unsafe fn os_task_stk_init(
        _task_fn: OsTaskFn,
        _arg: *mut (),
        stk_base: *mut OsStkElement,
        stk_size: usize,
        _opt: OsOpt,
    ) -> *mut OsStkElement {
        unsafe { stk_base.add(stk_size - 1) }
    }

    pub fn os_cpu_systick_init(_cnts: u32) {}

    pub fn os_cpu_cycle_counter_init() {}

    /// Advances by one per read so busy-waits terminate
    pub fn os_cpu_cycle_count() -> u32 {
        CYCLES.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
