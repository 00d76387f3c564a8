//! Event flag groups
//!
//! A task waits for all or any of a set of bits. The value returned to a
//! waiter is the group value at the moment its condition became true,
//! before any consumption.

use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::sched;
use crate::sync::pend_list::{
    os_pend_abort_all, os_pend_allowed, os_pend_block, os_pend_ready, os_pend_wait, PendList,
    PendOutcome,
};
use crate::types::{opt, OsFlags, OsObjType, OsOpt, OsPendOn, OsPendStatus, OsTick};

/// Flag group state
pub struct OsFlagGrp {
    obj_type: OsObjType,
    pend_list: PendList,
    flags: OsFlags,
    name: &'static str,
}

impl OsFlagGrp {
    pub const fn new() -> Self {
        OsFlagGrp {
            obj_type: OsObjType::None,
            pend_list: PendList::new(),
            flags: 0,
            name: "",
        }
    }

    #[inline]
    fn check(&self) -> OsResult<()> {
        if self.obj_type != OsObjType::Flag {
            return Err(OsError::ObjType);
        }
        Ok(())
    }

    /// Whether the current value satisfies a wait for `wanted` in `mode`
    fn satisfied(&self, wanted: OsFlags, mode: OsOpt) -> bool {
        let hit = self.flags & wanted;
        if mode & opt::FLAG_SET_ALL != 0 {
            hit == wanted
        } else {
            hit != 0
        }
    }

    /// Wake every waiter whose condition now holds, in priority order.
    ///
    /// # Safety
    /// Interrupts must be masked.
    unsafe fn wake_satisfied(&mut self) -> bool {
        let mut woke = false;
        let mut current = self.pend_list.head();

        while let Some(tcb_ptr) = current {
            let tcb = unsafe { &mut *tcb_ptr.as_ptr() };
            current = tcb.pend_next_ptr;

            if self.satisfied(tcb.flags_pend, tcb.flags_opt) {
                tcb.flags_rdy = self.flags;
                if tcb.flags_opt & opt::FLAG_CONSUME != 0 {
                    self.flags &= !tcb.flags_pend;
                }
                unsafe { os_pend_ready(tcb_ptr, OsPendStatus::Ok) };
                woke = true;
            }
        }
        woke
    }
}

impl Default for OsFlagGrp {
    fn default() -> Self {
        Self::new()
    }
}

/// Event flag group usable from a `static`
pub struct FlagGroup {
    inner: CsCell<OsFlagGrp>,
}

impl FlagGroup {
    pub const fn new() -> Self {
        FlagGroup {
            inner: CsCell::new(OsFlagGrp::new()),
        }
    }

    /// Create the group with an initial value
    pub fn create(&self, flags: OsFlags, name: &'static str) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        critical_section(|cs| {
            let grp = self.inner.get(cs);
            if grp.obj_type == OsObjType::Flag {
                return Err(OsError::ObjCreated);
            }
            grp.obj_type = OsObjType::Flag;
            grp.pend_list.init();
            grp.flags = flags;
            grp.name = name;
            Ok(())
        })
    }

    /// Wait until `flags` are set
    ///
    /// `pend_opt` combines exactly one of [`opt::FLAG_SET_ALL`] or
    /// [`opt::FLAG_SET_ANY`] with optional [`opt::FLAG_CONSUME`] and
    /// [`opt::PEND_NON_BLOCKING`].
    ///
    /// # Returns
    /// * `Ok(value)` - Group value when the wait was satisfied
    /// * `Err(OsError::FlagPendOpt)` - No flags or no valid wait mode
    /// * `Err(OsError::PendWouldBlock)` - Non-blocking and not satisfied
    /// * `Err(OsError::Timeout)` - Timeout expired
    pub fn pend(&self, flags: OsFlags, timeout: OsTick, pend_opt: OsOpt) -> OsResult<OsFlags> {
        let mode = pend_opt & (opt::FLAG_SET_ALL | opt::FLAG_SET_ANY);
        if flags == 0 || !(mode == opt::FLAG_SET_ALL || mode == opt::FLAG_SET_ANY) {
            return Err(OsError::FlagPendOpt);
        }

        let non_blocking = pend_opt & opt::PEND_NON_BLOCKING != 0;
        if !non_blocking {
            os_pend_allowed()?;
        }

        let outcome = critical_section(|cs| {
            let grp = self.inner.get(cs);
            grp.check()?;

            if grp.satisfied(flags, mode) {
                let value = grp.flags;
                if pend_opt & opt::FLAG_CONSUME != 0 {
                    grp.flags &= !flags;
                }
                return Ok(PendOutcome::Done(value));
            }

            if non_blocking {
                return Err(OsError::PendWouldBlock);
            }

            let tcb = unsafe { os_pend_block(&mut grp.pend_list, OsPendOn::Flag, timeout) }?;
            let tcb_ref = unsafe { &mut *tcb.as_ptr() };
            tcb_ref.flags_pend = flags;
            tcb_ref.flags_opt = pend_opt;
            tcb_ref.flags_rdy = 0;
            Ok(PendOutcome::Blocked(tcb))
        })?;

        match outcome {
            PendOutcome::Done(value) => Ok(value),
            PendOutcome::Blocked(tcb) => {
                os_pend_wait(tcb)?;
                Ok(critical_section(|_cs| unsafe { tcb.as_ref() }.flags_rdy))
            }
        }
    }

    /// Set or clear bits
    ///
    /// `post_opt` is [`opt::FLAG_SET`] or [`opt::FLAG_CLR`]. Safe to call
    /// from an ISR. Returns the group value after waiters consumed their
    /// bits.
    pub fn post(&self, flags: OsFlags, post_opt: OsOpt) -> OsResult<OsFlags> {
        let (value, woke) = critical_section(|cs| {
            let grp = self.inner.get(cs);
            grp.check()?;

            if post_opt & opt::FLAG_SET != 0 {
                grp.flags |= flags;
            } else if post_opt & opt::FLAG_CLR != 0 {
                grp.flags &= !flags;
            } else {
                return Err(OsError::OptInvalid);
            }

            let woke = unsafe { grp.wake_satisfied() };
            Ok((grp.flags, woke))
        })?;

        if woke && post_opt & opt::POST_NO_SCHED == 0 {
            sched::os_sched();
        }
        Ok(value)
    }

    /// Current group value
    pub fn flags(&self) -> OsResult<OsFlags> {
        critical_section(|cs| {
            let grp = self.inner.get(cs);
            grp.check()?;
            Ok(grp.flags)
        })
    }

    /// Delete the group, waking every waiter with `ObjDel`
    pub fn del(&self) -> OsResult<usize> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        let woken = critical_section(|cs| {
            let grp = self.inner.get(cs);
            grp.check()?;
            let woken = unsafe { os_pend_abort_all(&mut grp.pend_list, OsPendStatus::Del) };
            grp.obj_type = OsObjType::None;
            grp.flags = 0;
            Ok(woken)
        })?;

        if woken > 0 {
            sched::os_sched();
        }
        Ok(woken)
    }

    pub fn name(&self) -> &'static str {
        critical_section(|cs| self.inner.get(cs).name)
    }
}

impl Default for FlagGroup {
    fn default() -> Self {
        Self::new()
    }
}
