//! Tasks
//!
//! A task owns a static TCB and stack handed in at creation. Suspension
//! nests and is layered over whatever the task was doing, see
//! [`OsTaskState`].

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::config::{CFG_PRIO_IDLE, CFG_PRIO_MAX, CFG_STK_SIZE_MIN, CFG_TIME_QUANTA_DEFAULT};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::types::{opt, OsObjType, OsOpt, OsPrio, OsStkElement, OsTaskState, OsTick};

/// Task entry point function type
pub type OsTaskFn = fn(*mut ()) -> !;

/// Create a task from raw parts.
///
/// With [`opt::TASK_DONT_START`] the task is created suspended and only
/// runs after [`os_task_resume`].
///
/// # Safety
/// `tcb` and the stack must stay valid for as long as the task exists.
#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn os_task_create_raw(
    tcb: *mut OsTcb,
    name: &'static str,
    task_fn: OsTaskFn,
    arg: *mut (),
    prio: OsPrio,
    stk_base: *mut OsStkElement,
    stk_size: usize,
    time_quanta: OsTick,
    task_opt: OsOpt,
) -> OsResult<()> {
    if tcb.is_null() {
        return Err(OsError::TcbInvalid);
    }

    if stk_base.is_null() {
        return Err(OsError::StkInvalid);
    }

    if stk_size < CFG_STK_SIZE_MIN {
        return Err(OsError::StkSizeInvalid);
    }

    if prio as usize >= CFG_PRIO_MAX {
        return Err(OsError::PrioInvalid);
    }

    if is_isr_context() {
        return Err(OsError::TaskCreateIsr);
    }

    critical_section(|_cs| {
        let tcb_ref = unsafe { &mut *tcb };
        tcb_ref.init();

        tcb_ref.obj_type = OsObjType::Task;
        tcb_ref.name = name;
        tcb_ref.prio = prio;
        tcb_ref.base_prio = prio;
        tcb_ref.time_quanta = time_quanta;
        tcb_ref.time_quanta_ctr = time_quanta;
        tcb_ref.opt = task_opt;

        tcb_ref.stk_ptr =
            unsafe { crate::port::os_task_stk_init(task_fn, arg, stk_base, stk_size, task_opt) };
        tcb_ref.stk_base = stk_base;
        tcb_ref.stk_size = stk_size;

        let tcb_nonnull = unsafe { NonNull::new_unchecked(tcb) };
        if task_opt & opt::TASK_DONT_START != 0 {
            tcb_ref.task_state = OsTaskState::Suspended;
            tcb_ref.suspend_ctr = 1;
        } else {
            tcb_ref.task_state = OsTaskState::Ready;
            unsafe { sched::os_rdy_list_insert(tcb_nonnull) };
        }
    });

    crate::debug!("task {} created at prio {}", name, prio);
    sched::os_sched();
    Ok(())
}

/// Create a new task using static references
///
/// # Example
/// ```ignore
/// static mut TASK_TCB: OsTcb = OsTcb::new();
/// static mut TASK_STK: [OsStkElement; 256] = [0; 256];
///
/// fn my_task(_: *mut ()) -> ! {
///     loop { /* ... */ }
/// }
///
/// os_task_create(
///     unsafe { &mut TASK_TCB },
///     unsafe { &mut TASK_STK },
///     "MyTask",
///     my_task,
///     5,
/// )?;
/// ```
pub fn os_task_create(
    tcb: &'static mut OsTcb,
    stack: &'static mut [OsStkElement],
    name: &'static str,
    task_fn: OsTaskFn,
    prio: OsPrio,
) -> OsResult<()> {
    unsafe {
        os_task_create_raw(
            tcb as *mut OsTcb,
            name,
            task_fn,
            core::ptr::null_mut(),
            prio,
            stack.as_mut_ptr(),
            stack.len(),
            CFG_TIME_QUANTA_DEFAULT,
            opt::TASK_NONE,
        )
    }
}

fn resolve(tcb: Option<NonNull<OsTcb>>) -> OsResult<NonNull<OsTcb>> {
    let tcb_ptr = match tcb {
        Some(ptr) => ptr,
        None => unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?,
    };
    if unsafe { tcb_ptr.as_ref() }.obj_type != OsObjType::Task {
        return Err(OsError::ObjType);
    }
    Ok(tcb_ptr)
}

/// Delete a task in any state
///
/// `None` deletes the calling task, which never returns from here once the
/// kernel is running.
pub fn os_task_del(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskDelIsr);
    }

    critical_section(|_cs| {
        let tcb_ptr = resolve(tcb)?;
        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };

        if tcb_ref.prio == CFG_PRIO_IDLE {
            return Err(OsError::TaskDelIdle);
        }

        match tcb_ref.task_state {
            OsTaskState::Ready => unsafe { sched::os_rdy_list_remove(tcb_ptr) },
            OsTaskState::Delayed | OsTaskState::DelayedSuspended => unsafe {
                kernel::tick_wheel_remove(tcb_ptr)
            },
            OsTaskState::Pend
            | OsTaskState::PendTimeout
            | OsTaskState::PendSuspended
            | OsTaskState::PendTimeoutSuspended => {
                if let Some(list) = tcb_ref.pend_list.take() {
                    unsafe { (*list.as_ptr()).remove(tcb_ptr) };
                }
                unsafe { kernel::tick_wheel_remove(tcb_ptr) };
            }
            OsTaskState::Suspended | OsTaskState::Deleted => {}
        }

        crate::debug!("task {} deleted", tcb_ref.name);
        tcb_ref.task_state = OsTaskState::Deleted;
        tcb_ref.obj_type = OsObjType::None;
        tcb_ref.suspend_ctr = 0;
        Ok(())
    })?;

    sched::os_sched();
    Ok(())
}

/// Suspend a task; suspensions nest
pub fn os_task_suspend(tcb: Option<NonNull<OsTcb>>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskSuspendIsr);
    }

    critical_section(|_cs| {
        let tcb_ptr = resolve(tcb)?;
        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };

        if tcb_ref.prio == CFG_PRIO_IDLE {
            return Err(OsError::TaskSuspendIdle);
        }

        tcb_ref.suspend_ctr = tcb_ref.suspend_ctr.saturating_add(1);

        match tcb_ref.task_state {
            OsTaskState::Ready => {
                tcb_ref.task_state = OsTaskState::Suspended;
                unsafe { sched::os_rdy_list_remove(tcb_ptr) };
            }
            OsTaskState::Delayed => tcb_ref.task_state = OsTaskState::DelayedSuspended,
            OsTaskState::Pend => tcb_ref.task_state = OsTaskState::PendSuspended,
            OsTaskState::PendTimeout => tcb_ref.task_state = OsTaskState::PendTimeoutSuspended,
            _ => {}
        }
        Ok(())
    })?;

    sched::os_sched();
    Ok(())
}

/// Resume a suspended task
pub fn os_task_resume(tcb: NonNull<OsTcb>) -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::TaskResumeIsr);
    }

    critical_section(|_cs| {
        let tcb_ptr = resolve(Some(tcb))?;
        let tcb_ref = unsafe { &mut *tcb_ptr.as_ptr() };

        if tcb_ref.suspend_ctr == 0 {
            return Err(OsError::TaskNotSuspended);
        }

        tcb_ref.suspend_ctr -= 1;
        if tcb_ref.suspend_ctr > 0 {
            return Ok(());
        }

        match tcb_ref.task_state {
            OsTaskState::Suspended => {
                tcb_ref.task_state = OsTaskState::Ready;
                unsafe { sched::os_rdy_list_insert(tcb_ptr) };
            }
            OsTaskState::DelayedSuspended => tcb_ref.task_state = OsTaskState::Delayed,
            OsTaskState::PendSuspended => tcb_ref.task_state = OsTaskState::Pend,
            OsTaskState::PendTimeoutSuspended => tcb_ref.task_state = OsTaskState::PendTimeout,
            _ => {}
        }
        Ok(())
    })?;

    sched::os_sched();
    Ok(())
}
