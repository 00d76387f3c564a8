//! Mutex implementation with priority inheritance
//!
//! Mutexes are owned and recursive: the owner may lock again and must
//! unlock as many times. A higher priority waiter lends its priority to the
//! owner until the mutex is released.

use core::ptr::NonNull;

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sched;
use crate::sync::pend_list::{
    os_pend_abort_all, os_pend_allowed, os_pend_block, os_pend_ready, os_pend_wait, PendList,
    PendOutcome,
};
use crate::task::OsTcb;
use crate::types::{opt, OsNestingCtr, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsTick};

/// Who holds a mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    /// Locked before the kernel started running tasks
    Startup,
    Task(NonNull<OsTcb>),
}

impl Owner {
    fn current() -> OsResult<Self> {
        if !kernel::KERNEL.is_running() {
            return Ok(Owner::Startup);
        }
        unsafe { kernel::tcb_cur_ptr() }
            .map(Owner::Task)
            .ok_or(OsError::TcbInvalid)
    }

    fn task(self) -> Option<NonNull<OsTcb>> {
        match self {
            Owner::Startup => None,
            Owner::Task(tcb) => Some(tcb),
        }
    }
}

/// Mutex state
pub struct OsMutex {
    obj_type: OsObjType,
    /// Tasks waiting on this mutex
    pend_list: PendList,
    owner: Option<Owner>,
    nesting_ctr: OsNestingCtr,
    name: &'static str,
}

unsafe impl Send for OsMutex {}

impl OsMutex {
    pub const fn new() -> Self {
        OsMutex {
            obj_type: OsObjType::None,
            pend_list: PendList::new(),
            owner: None,
            nesting_ctr: 0,
            name: "",
        }
    }

    #[inline]
    fn check(&self) -> OsResult<()> {
        if self.obj_type != OsObjType::Mutex {
            return Err(OsError::ObjType);
        }
        Ok(())
    }

    /// Drop any priority the owner inherited through this mutex.
    ///
    /// # Safety
    /// Interrupts must be masked.
    unsafe fn restore_owner_prio(&self) {
        if let Some(owner_ptr) = self.owner.and_then(Owner::task) {
            let base = unsafe { owner_ptr.as_ref() }.base_prio;
            unsafe { sched::os_change_prio(owner_ptr, base) };
        }
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutex usable from a `static`
pub struct Mutex {
    inner: CsCell<OsMutex>,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: CsCell::new(OsMutex::new()),
        }
    }

    /// Create the mutex
    pub fn create(&self, name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        critical_section(|cs| {
            let mutex = self.inner.get(cs);
            if mutex.obj_type == OsObjType::Mutex {
                return Err(OsError::ObjCreated);
            }
            mutex.obj_type = OsObjType::Mutex;
            mutex.pend_list.init();
            mutex.owner = None;
            mutex.nesting_ctr = 0;
            mutex.name = name;
            Ok(())
        })
    }

    /// Acquire the mutex
    ///
    /// If the mutex is owned by a lower-priority task, the owner's priority
    /// is temporarily boosted to prevent priority inversion.
    ///
    /// Before the kernel starts only the non-blocking path is available and
    /// the start-up context is the owner.
    ///
    /// # Arguments
    /// * `timeout` - Maximum ticks to wait (0 = forever)
    /// * `pend_opt` - Pend options
    pub fn lock(&self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::PendIsr);
        }

        let non_blocking = pend_opt & opt::PEND_NON_BLOCKING != 0;

        let outcome = critical_section(|cs| {
            let mutex = self.inner.get(cs);
            mutex.check()?;

            let me = Owner::current()?;

            let Some(owner) = mutex.owner else {
                mutex.owner = Some(me);
                mutex.nesting_ctr = 1;
                return Ok(PendOutcome::Done(()));
            };

            if owner == me {
                mutex.nesting_ctr = mutex.nesting_ctr.checked_add(1).ok_or(OsError::MutexOvf)?;
                return Ok(PendOutcome::Done(()));
            }

            if non_blocking {
                return Err(OsError::PendWouldBlock);
            }
            os_pend_allowed()?;

            if let (Some(owner_ptr), Some(cur_ptr)) = (owner.task(), me.task()) {
                let cur_prio = unsafe { cur_ptr.as_ref() }.prio;
                if cur_prio < unsafe { owner_ptr.as_ref() }.prio {
                    unsafe { sched::os_change_prio(owner_ptr, cur_prio) };
                }
            }

            let tcb = unsafe { os_pend_block(&mut mutex.pend_list, OsPendOn::Mutex, timeout) }?;
            Ok(PendOutcome::Blocked(tcb))
        })?;

        match outcome {
            PendOutcome::Done(()) => Ok(()),
            PendOutcome::Blocked(tcb) => os_pend_wait(tcb),
        }
    }

    /// Release the mutex
    ///
    /// On the last unlock the owner drops back to its base priority and the
    /// highest priority waiter becomes the new owner.
    pub fn unlock(&self, post_opt: OsOpt) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::AcceptIsr);
        }

        let handed_over = critical_section(|cs| {
            let mutex = self.inner.get(cs);
            mutex.check()?;

            if mutex.owner != Some(Owner::current()?) {
                return Err(OsError::MutexNotOwner);
            }

            if mutex.nesting_ctr > 1 {
                mutex.nesting_ctr -= 1;
                return Ok(false);
            }

            unsafe { mutex.restore_owner_prio() };

            match mutex.pend_list.head() {
                Some(waiter_ptr) => {
                    unsafe { os_pend_ready(waiter_ptr, OsPendStatus::Ok) };
                    mutex.owner = Some(Owner::Task(waiter_ptr));
                    mutex.nesting_ctr = 1;
                    Ok(true)
                }
                None => {
                    mutex.owner = None;
                    mutex.nesting_ctr = 0;
                    Ok(false)
                }
            }
        })?;

        if handed_over && post_opt & opt::POST_NO_SCHED == 0 {
            sched::os_sched();
        }
        Ok(())
    }

    /// Delete the mutex, waking every waiter with `ObjDel`
    pub fn del(&self) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        let woken = critical_section(|cs| {
            let mutex = self.inner.get(cs);
            mutex.check()?;
            unsafe { mutex.restore_owner_prio() };
            let woken = unsafe { os_pend_abort_all(&mut mutex.pend_list, OsPendStatus::Del) };
            mutex.obj_type = OsObjType::None;
            mutex.owner = None;
            mutex.nesting_ctr = 0;
            Ok(woken)
        })?;

        sched::os_sched();
        Ok(woken)
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        critical_section(|cs| self.inner.get(cs).owner.is_some())
    }

    pub fn name(&self) -> &'static str {
        critical_section(|cs| self.inner.get(cs).name)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
