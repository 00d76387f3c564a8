//! Scheduler
//!
//! Priority-based preemptive scheduling with round-robin inside a priority.
//! The actual switch is deferred to PendSV, so every function here may be
//! called with interrupts masked; the switch happens once they are unmasked.

mod rdy_list;

pub use rdy_list::ReadyList;

use core::ptr::NonNull;

use crate::config::CFG_SCHED_ROUND_ROBIN_EN;
use crate::critical::{critical_section, is_isr_context};
use crate::kernel;
use crate::task::OsTcb;
use crate::types::OsPrio;

/// Scheduling point for task level code.
///
/// Picks the highest ready task and requests a context switch if it differs
/// from the running one. Does nothing from an ISR (the switch happens in
/// [`os_int_exit`](crate::kernel::os_int_exit)).
pub fn os_sched() {
    if !kernel::KERNEL.is_running() || is_isr_context() {
        return;
    }

    critical_section(|_cs| unsafe {
        let high_prio = kernel::prio_table().get_highest();
        if let Some(high_rdy) = kernel::rdy_list(high_prio).head() {
            kernel::set_prio_high_rdy(high_prio);
            kernel::set_tcb_high_rdy_ptr(Some(high_rdy));

            if Some(high_rdy) != kernel::tcb_cur_ptr() {
                crate::port::os_ctx_sw();
            }
        }
    });
}

/// Rotate the running task behind its peers when its quantum is used up.
///
/// Called from the tick interrupt.
pub(crate) fn os_sched_round_robin() {
    if !CFG_SCHED_ROUND_ROBIN_EN || !kernel::KERNEL.is_running() {
        return;
    }

    critical_section(|_cs| unsafe {
        let Some(cur_tcb_ptr) = kernel::tcb_cur_ptr() else {
            return;
        };
        let cur_tcb = &mut *cur_tcb_ptr.as_ptr();
        if !cur_tcb.is_ready() {
            return;
        }

        cur_tcb.time_quanta_ctr = cur_tcb.time_quanta_ctr.saturating_sub(1);
        if cur_tcb.time_quanta_ctr > 0 {
            return;
        }
        cur_tcb.time_quanta_ctr = cur_tcb.time_quanta;

        let rdy_list = kernel::rdy_list(cur_tcb.prio);
        if rdy_list.head() != rdy_list.tail() {
            rdy_list.remove(cur_tcb_ptr);
            rdy_list.insert_tail(cur_tcb_ptr);
        }
    });
}

/// Make a task ready.
///
/// # Safety
/// Interrupts must be masked and `tcb` must not be in a ready list.
pub(crate) unsafe fn os_rdy_list_insert(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref() }.prio;

    unsafe {
        kernel::rdy_list(prio).insert_tail(tcb);
        kernel::prio_table().insert(prio);
    }
}

/// Remove a task from its ready list.
///
/// # Safety
/// Interrupts must be masked and `tcb` must be in the ready list of its
/// current priority.
pub(crate) unsafe fn os_rdy_list_remove(tcb: NonNull<OsTcb>) {
    let prio = unsafe { tcb.as_ref() }.prio;

    unsafe {
        let rdy_list = kernel::rdy_list(prio);
        rdy_list.remove(tcb);

        if rdy_list.is_empty() {
            kernel::prio_table().remove(prio);
        }
    }
}

/// Change the priority of a task, moving it between ready lists if it is
/// ready.
///
/// # Safety
/// Interrupts must be masked.
pub(crate) unsafe fn os_change_prio(tcb: NonNull<OsTcb>, new_prio: OsPrio) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };
    if tcb_ref.prio == new_prio {
        return;
    }

    if tcb_ref.is_ready() {
        unsafe { os_rdy_list_remove(tcb) };
        tcb_ref.prio = new_prio;
        unsafe { os_rdy_list_insert(tcb) };
    } else {
        tcb_ref.prio = new_prio;
    }
}
