//! Semaphore implementation
//!
//! Counting semaphores for task synchronization and resource counting.

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::sched;
use crate::sync::pend_list::{
    os_pend_abort_all, os_pend_allowed, os_pend_block, os_pend_ready, os_pend_wait, PendList,
    PendOutcome,
};
use crate::types::{opt, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsSemCtr, OsTick};

/// Counting semaphore state
pub struct OsSem {
    obj_type: OsObjType,
    /// Tasks waiting on this semaphore
    pend_list: PendList,
    count: OsSemCtr,
    name: &'static str,
}

impl OsSem {
    pub const fn new() -> Self {
        OsSem {
            obj_type: OsObjType::None,
            pend_list: PendList::new(),
            count: 0,
            name: "",
        }
    }

    #[inline]
    fn check(&self) -> OsResult<()> {
        if self.obj_type != OsObjType::Sem {
            return Err(OsError::ObjType);
        }
        Ok(())
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting semaphore usable from a `static`
///
/// Every access to the state happens inside a critical section.
pub struct Semaphore {
    inner: CsCell<OsSem>,
}

impl Semaphore {
    pub const fn new() -> Self {
        Semaphore {
            inner: CsCell::new(OsSem::new()),
        }
    }

    /// Create the semaphore with an initial count
    ///
    /// # Returns
    /// * `Err(OsError::CreateIsr)` - Called from an ISR
    /// * `Err(OsError::ObjCreated)` - Already created
    pub fn create(&self, count: OsSemCtr, name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        critical_section(|cs| {
            let sem = self.inner.get(cs);
            if sem.obj_type == OsObjType::Sem {
                return Err(OsError::ObjCreated);
            }
            sem.obj_type = OsObjType::Sem;
            sem.pend_list.init();
            sem.count = count;
            sem.name = name;
            Ok(())
        })
    }

    /// Wait on (pend) the semaphore
    ///
    /// # Arguments
    /// * `timeout` - Maximum ticks to wait (0 = forever)
    /// * `pend_opt` - [`opt::PEND_BLOCKING`] or [`opt::PEND_NON_BLOCKING`]
    ///
    /// # Returns
    /// * `Ok(count)` - Semaphore acquired, returns the remaining count
    /// * `Err(OsError::Timeout)` - Timeout expired
    /// * `Err(OsError::PendWouldBlock)` - Non-blocking and not available
    /// * `Err(OsError::ObjDel)` - Deleted while waiting
    pub fn wait(&self, timeout: OsTick, pend_opt: OsOpt) -> OsResult<OsSemCtr> {
        let non_blocking = pend_opt & opt::PEND_NON_BLOCKING != 0;
        if !non_blocking {
            os_pend_allowed()?;
        }

        let outcome = critical_section(|cs| {
            let sem = self.inner.get(cs);
            sem.check()?;

            if sem.count > 0 {
                sem.count -= 1;
                return Ok(PendOutcome::Done(sem.count));
            }

            if non_blocking {
                return Err(OsError::PendWouldBlock);
            }

            let tcb = unsafe { os_pend_block(&mut sem.pend_list, OsPendOn::Semaphore, timeout) }?;
            Ok(PendOutcome::Blocked(tcb))
        })?;

        match outcome {
            PendOutcome::Done(count) => Ok(count),
            PendOutcome::Blocked(tcb) => {
                os_pend_wait(tcb)?;
                Ok(self.count())
            }
        }
    }

    /// Signal (post) the semaphore
    ///
    /// Hands the unit straight to the highest priority waiter if there is
    /// one. Safe to call from an ISR.
    ///
    /// # Returns
    /// * `Ok(count)` - Count after the post
    /// * `Err(OsError::SemOvf)` - Counter overflow
    pub fn signal(&self, post_opt: OsOpt) -> OsResult<OsSemCtr> {
        let (count, woke) = critical_section(|cs| {
            let sem = self.inner.get(cs);
            sem.check()?;

            if let Some(tcb) = sem.pend_list.head() {
                unsafe { os_pend_ready(tcb, OsPendStatus::Ok) };
                return Ok((sem.count, true));
            }

            sem.count = sem.count.checked_add(1).ok_or(OsError::SemOvf)?;
            Ok((sem.count, false))
        })?;

        if woke && post_opt & opt::POST_NO_SCHED == 0 {
            sched::os_sched();
        }
        Ok(count)
    }

    /// Delete the semaphore, waking every waiter with `ObjDel`
    ///
    /// Returns the number of tasks that were waiting.
    pub fn del(&self) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        let woken = critical_section(|cs| {
            let sem = self.inner.get(cs);
            sem.check()?;
            let woken = unsafe { os_pend_abort_all(&mut sem.pend_list, OsPendStatus::Del) };
            sem.obj_type = OsObjType::None;
            sem.count = 0;
            Ok(woken)
        })?;

        if woken > 0 {
            sched::os_sched();
        }
        Ok(woken)
    }

    /// Get current semaphore count
    pub fn count(&self) -> OsSemCtr {
        critical_section(|cs| self.inner.get(cs).count)
    }

    pub fn is_created(&self) -> bool {
        critical_section(|cs| self.inner.get(cs).obj_type == OsObjType::Sem)
    }

    pub fn name(&self) -> &'static str {
        critical_section(|cs| self.inner.get(cs).name)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
