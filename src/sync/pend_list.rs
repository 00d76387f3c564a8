//! Pend list and the blocking protocol shared by all kernel objects
//!
//! A task blocks in two steps: [`os_pend_block`] moves it from the ready list
//! onto an object's pend list while interrupts are masked, then
//! [`os_pend_wait`] runs the scheduler outside the critical section and reads
//! back why the task was woken.

use core::ptr::NonNull;

use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::task::OsTcb;
use crate::types::{OsPendOn, OsPendStatus, OsTaskState, OsTick};

/// Tasks waiting on a kernel object, highest priority first
#[derive(Debug)]
pub struct PendList {
    head: Option<NonNull<OsTcb>>,
    tail: Option<NonNull<OsTcb>>,
}

impl PendList {
    pub const fn new() -> Self {
        PendList {
            head: None,
            tail: None,
        }
    }

    pub fn init(&mut self) {
        self.head = None;
        self.tail = None;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline(always)]
    pub fn head(&self) -> Option<NonNull<OsTcb>> {
        self.head
    }

    /// Insert in priority order, FIFO among equal priorities
    pub fn insert_by_prio(&mut self, tcb: NonNull<OsTcb>) {
        let prio = unsafe { tcb.as_ref() }.prio;

        let mut current = self.head;
        let mut prev: Option<NonNull<OsTcb>> = None;

        while let Some(cur_ptr) = current {
            let cur_ref = unsafe { cur_ptr.as_ref() };
            if prio < cur_ref.prio {
                break;
            }
            prev = current;
            current = cur_ref.pend_next_ptr;
        }

        let tcb_mut = unsafe { &mut *tcb.as_ptr() };
        tcb_mut.pend_prev_ptr = prev;
        tcb_mut.pend_next_ptr = current;

        match prev {
            Some(p) => unsafe { (*p.as_ptr()).pend_next_ptr = Some(tcb) },
            None => self.head = Some(tcb),
        }

        match current {
            Some(c) => unsafe { (*c.as_ptr()).pend_prev_ptr = Some(tcb) },
            None => self.tail = Some(tcb),
        }
    }

    /// Remove specific TCB from list
    pub fn remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };

        match tcb_ref.pend_prev_ptr {
            Some(prev) => unsafe { (*prev.as_ptr()).pend_next_ptr = tcb_ref.pend_next_ptr },
            None => self.head = tcb_ref.pend_next_ptr,
        }

        match tcb_ref.pend_next_ptr {
            Some(next) => unsafe { (*next.as_ptr()).pend_prev_ptr = tcb_ref.pend_prev_ptr },
            None => self.tail = tcb_ref.pend_prev_ptr,
        }

        tcb_ref.pend_prev_ptr = None;
        tcb_ref.pend_next_ptr = None;
    }
}

impl Default for PendList {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for PendList {}
unsafe impl Sync for PendList {}

/// Outcome of the locked half of a pend
pub(crate) enum PendOutcome<T> {
    /// Satisfied without blocking
    Done(T),
    /// The running task was put on a pend list
    Blocked(NonNull<OsTcb>),
}

/// Check that the running task is allowed to block right now.
pub(crate) fn os_pend_allowed() -> OsResult<()> {
    if is_isr_context() {
        return Err(OsError::PendIsr);
    }
    if !kernel::KERNEL.is_running() {
        return Err(OsError::OsNotRunning);
    }
    Ok(())
}

/// Block the running task on `list`.
///
/// `timeout` of 0 waits forever, anything else also arms the tick wheel.
/// Returns the blocked task.
///
/// # Safety
/// Interrupts must be masked, the kernel must be running and `list` must not
/// move until the task has been readied again.
pub(crate) unsafe fn os_pend_block(
    list: &mut PendList,
    pend_on: OsPendOn,
    timeout: OsTick,
) -> OsResult<NonNull<OsTcb>> {
    let cur_ptr = unsafe { kernel::tcb_cur_ptr() }.ok_or(OsError::TcbInvalid)?;
    let cur = unsafe { &mut *cur_ptr.as_ptr() };

    unsafe { sched::os_rdy_list_remove(cur_ptr) };

    cur.pend_on = pend_on;
    cur.pend_status = OsPendStatus::Ok;
    cur.pend_list = Some(NonNull::from(&mut *list));
    list.insert_by_prio(cur_ptr);

    if timeout > 0 {
        cur.task_state = OsTaskState::PendTimeout;
        cur.tick_remain = timeout;
        let expiry = kernel::KERNEL.tick_get().wrapping_add(timeout);
        unsafe { kernel::tick_wheel_insert(cur_ptr, expiry) };
    } else {
        cur.task_state = OsTaskState::Pend;
    }

    Ok(cur_ptr)
}

/// Finish a pend: unlink `tcb` from its pend list and the tick wheel and
/// make it ready, unless it is also suspended.
///
/// # Safety
/// Interrupts must be masked and `tcb` must be pending.
pub(crate) unsafe fn os_pend_ready(tcb: NonNull<OsTcb>, status: OsPendStatus) {
    let tcb_ref = unsafe { &mut *tcb.as_ptr() };

    if let Some(list) = tcb_ref.pend_list.take() {
        unsafe { (*list.as_ptr()).remove(tcb) };
    }
    unsafe { kernel::tick_wheel_remove(tcb) };

    tcb_ref.tick_remain = 0;
    tcb_ref.pend_on = OsPendOn::Nothing;
    tcb_ref.pend_status = status;
    tcb_ref.task_state = tcb_ref.state_after_pend();

    if tcb_ref.is_ready() {
        unsafe { sched::os_rdy_list_insert(tcb) };
    }
}

/// Wake every waiter of a list with `status`.
///
/// # Safety
/// Interrupts must be masked.
pub(crate) unsafe fn os_pend_abort_all(list: &mut PendList, status: OsPendStatus) -> usize {
    let mut woken = 0;
    while let Some(tcb) = list.head() {
        unsafe { os_pend_ready(tcb, status) };
        woken += 1;
    }
    woken
}

/// Let the scheduler switch away, then report how the pend ended.
///
/// Must be called with interrupts enabled, right after [`os_pend_block`].
pub(crate) fn os_pend_wait(tcb: NonNull<OsTcb>) -> OsResult<()> {
    sched::os_sched();

    let status = critical_section(|_cs| unsafe { tcb.as_ref() }.pend_status);
    match status {
        OsPendStatus::Ok => Ok(()),
        OsPendStatus::Timeout => Err(OsError::Timeout),
        OsPendStatus::Abort => Err(OsError::PendAbort),
        OsPendStatus::Del => Err(OsError::ObjDel),
    }
}
