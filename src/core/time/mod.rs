//! Tick handling and delays
//!
//! Delays and finite pend timeouts share one tick wheel. A TCB sits in slot
//! `expiry % CFG_TICK_WHEEL_SIZE` and `tick_remain` counts down one wheel
//! turn per visit.

use crate::config::CFG_TICK_WHEEL_SIZE;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::pend_list::os_pend_ready;
use crate::types::{OsPendStatus, OsTaskState, OsTick};

/// Block the current task for `ticks`
///
/// # Returns
/// * `Err(OsError::OsNotRunning)` - Before `os_start`
/// * `Err(OsError::TimeDlyIsr)` - Called from an ISR
pub fn os_time_dly(ticks: OsTick) -> OsResult<()> {
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }

    if is_isr_context() {
        return Err(OsError::TimeDlyIsr);
    }

    if ticks == 0 {
        return Ok(());
    }

    critical_section(|_cs| unsafe {
        if let Some(cur_tcb) = kernel::tcb_cur_ptr() {
            let tcb = &mut *cur_tcb.as_ptr();

            tcb.tick_remain = ticks;
            tcb.task_state = OsTaskState::Delayed;

            let expiry_tick = kernel::KERNEL.tick_get().wrapping_add(ticks);
            kernel::tick_wheel_insert(cur_tcb, expiry_tick);

            sched::os_rdy_list_remove(cur_tcb);
        }
    });

    sched::os_sched();

    Ok(())
}

#[inline]
pub fn os_time_get() -> OsTick {
    kernel::KERNEL.tick_get()
}

/// Tick handler
///
/// Expires delays and pend timeouts, rotates round-robin peers and wakes the
/// timer service task.
pub fn os_tick_handler() {
    if !kernel::KERNEL.is_running() {
        return;
    }

    kernel::os_int_enter();

    kernel::KERNEL.tick_increment();

    critical_section(|_cs| process_tick_wheel());
    sched::os_sched_round_robin();

    #[cfg(feature = "tmr")]
    crate::tmr::os_tmr_signal();

    kernel::os_int_exit();
}

fn process_tick_wheel() {
    let slot = (kernel::KERNEL.tick_get() as usize) % CFG_TICK_WHEEL_SIZE;

    unsafe {
        let mut current = kernel::tick_wheel_head(slot);

        while let Some(tcb_ptr) = current {
            let tcb = &mut *tcb_ptr.as_ptr();
            let next = tcb.tick_next_ptr;

            if tcb.tick_remain <= CFG_TICK_WHEEL_SIZE as u32 {
                kernel::tick_wheel_remove(tcb_ptr);
                tcb.tick_remain = 0;

                match tcb.task_state {
                    OsTaskState::Delayed => {
                        tcb.task_state = OsTaskState::Ready;
                        sched::os_rdy_list_insert(tcb_ptr);
                    }
                    OsTaskState::DelayedSuspended => {
                        tcb.task_state = OsTaskState::Suspended;
                    }
                    OsTaskState::PendTimeout | OsTaskState::PendTimeoutSuspended => {
                        os_pend_ready(tcb_ptr, OsPendStatus::Timeout);
                    }
                    _ => {}
                }
            } else {
                tcb.tick_remain -= CFG_TICK_WHEEL_SIZE as u32;
            }

            current = next;
        }
    }
}

/// SysTick interrupt handler
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn SysTick() {
    os_tick_handler();
}
