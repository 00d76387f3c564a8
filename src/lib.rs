//! Portable RTOS primitives and a bus/device driver core
//!
//! - A preemptive priority kernel in the μC/OS-III mould (`core`, `sync`,
//!   `port`)
//! - One primitive-layer contract over that kernel and over `std` threads
//!   (`osal`)
//! - Bus managers, device instances, double-buffered reception and the
//!   peripheral registries built on it (`bsp`)

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "host")]
extern crate std;

// Single-core PRIMASK critical section for firmware builds
#[cfg(all(target_arch = "arm", not(feature = "host")))]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;
pub mod osal;
pub mod bsp;

pub use core::config;
pub use core::config::*;
pub use core::critical;
pub use core::error;
pub use core::error::OsError;
pub use core::kernel;
pub use core::kernel::{os_init, os_start};
pub use core::prio;
pub use core::types;
pub use core::types::*;
pub use core::task;
pub use core::task::os_task_create;
pub use core::sched;
pub use core::time;

#[cfg(feature = "tmr")]
pub use core::tmr;
#[cfg(feature = "sem")]
pub use sync::sem;
#[cfg(feature = "mutex")]
pub use sync::mutex;
#[cfg(feature = "flag")]
pub use sync::flag;

pub use osal::{Osal, OsalError, OsalResult, Status, Tick, NO_WAIT, WAIT_FOREVER};
