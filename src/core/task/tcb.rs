//! Task control block

use core::ptr::NonNull;

use crate::sync::pend_list::PendList;
use crate::types::{
    OsFlags, OsNestingCtr, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsPrio, OsStkElement,
    OsTaskState, OsTick,
};

/// Per-task kernel state
///
/// `stk_ptr` must stay the first field: the context switch stores the
/// outgoing stack pointer through the TCB address.
///
/// A TCB is linked into at most one ready list or pend list, and
/// independently into the tick wheel while it has a deadline.
#[repr(C)]
pub struct OsTcb {
    pub stk_ptr: *mut OsStkElement,
    pub stk_base: *mut OsStkElement,
    /// In words
    pub stk_size: usize,

    /// `Task` while the TCB is in use
    pub obj_type: OsObjType,
    pub name: &'static str,

    // Ready list
    pub next_ptr: Option<NonNull<OsTcb>>,
    pub prev_ptr: Option<NonNull<OsTcb>>,

    // Pend list
    pub pend_next_ptr: Option<NonNull<OsTcb>>,
    pub pend_prev_ptr: Option<NonNull<OsTcb>>,
    /// Back-link so an expiring timeout can unlink the waiter
    pub pend_list: Option<NonNull<PendList>>,
    pub pend_on: OsPendOn,
    pub pend_status: OsPendStatus,

    // Tick wheel
    pub tick_next_ptr: Option<NonNull<OsTcb>>,
    pub tick_prev_ptr: Option<NonNull<OsTcb>>,
    pub tick_remain: OsTick,
    pub tick_wheel_slot: u8,
    pub on_tick_wheel: bool,

    pub prio: OsPrio,
    /// Priority at creation, restored when a mutex boost ends
    pub base_prio: OsPrio,

    pub task_state: OsTaskState,
    pub opt: OsOpt,
    pub suspend_ctr: OsNestingCtr,

    pub time_quanta: OsTick,
    pub time_quanta_ctr: OsTick,

    // Event flag wait
    pub flags_pend: OsFlags,
    /// Group value when the wait was satisfied, before any consume
    pub flags_rdy: OsFlags,
    pub flags_opt: OsOpt,
}

impl OsTcb {
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_size: 0,
            obj_type: OsObjType::None,
            name: "",
            next_ptr: None,
            prev_ptr: None,
            pend_next_ptr: None,
            pend_prev_ptr: None,
            pend_list: None,
            pend_on: OsPendOn::Nothing,
            pend_status: OsPendStatus::Ok,
            tick_next_ptr: None,
            tick_prev_ptr: None,
            tick_remain: 0,
            tick_wheel_slot: 0,
            on_tick_wheel: false,
            prio: 0,
            base_prio: 0,
            task_state: OsTaskState::Ready,
            opt: 0,
            suspend_ctr: 0,
            time_quanta: 0,
            time_quanta_ctr: 0,
            flags_pend: 0,
            flags_rdy: 0,
            flags_opt: 0,
        }
    }

    /// Back to the freshly constructed state
    pub fn init(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.task_state == OsTaskState::Ready
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Suspended
                | OsTaskState::DelayedSuspended
                | OsTaskState::PendSuspended
                | OsTaskState::PendTimeoutSuspended
        )
    }

    #[inline]
    pub fn is_delayed(&self) -> bool {
        matches!(
            self.task_state,
            OsTaskState::Delayed | OsTaskState::DelayedSuspended
        )
    }

    /// State after a pend finished, keeping any suspension.
    #[inline]
    pub(crate) fn state_after_pend(&self) -> OsTaskState {
        if self.is_suspended() {
            OsTaskState::Suspended
        } else {
            OsTaskState::Ready
        }
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
