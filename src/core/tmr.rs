//! Software timers
//!
//! Running timers sit on one list sorted by the tick they fire at. The tick
//! handler only signals the timer task; the task pops expired timers under
//! a critical section and runs their callbacks with interrupts enabled.

use core::ptr::NonNull;

use crate::config::{CFG_TIME_QUANTA_DEFAULT, CFG_TMR_TASK_PRIO, CFG_TMR_TASK_STK_SIZE};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::kernel;
use crate::sem::Semaphore;
use crate::task::OsTcb;
use crate::types::{opt, OsObjType, OsOpt, OsStkElement, OsTick};

/// Timer callback, called from the timer task with the registered argument
pub type OsTmrCallback = fn(usize);

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OsTmrState {
    Unused,
    Stopped,
    Running,
    /// One-shot timer that fired
    Completed,
}

pub struct OsTmr {
    obj_type: OsObjType,
    name: &'static str,
    callback: Option<OsTmrCallback>,
    arg: usize,
    /// Initial delay, 0 starts a periodic timer on its period
    dly: OsTick,
    period: OsTick,
    opt: OsOpt,
    state: OsTmrState,
    match_tick: OsTick,
    next: Option<NonNull<OsTmr>>,
    prev: Option<NonNull<OsTmr>>,
}

unsafe impl Send for OsTmr {}

impl OsTmr {
    pub const fn new() -> Self {
        OsTmr {
            obj_type: OsObjType::None,
            name: "",
            callback: None,
            arg: 0,
            dly: 0,
            period: 0,
            opt: opt::NONE,
            state: OsTmrState::Unused,
            match_tick: 0,
            next: None,
            prev: None,
        }
    }

    #[inline]
    fn check(&self) -> OsResult<()> {
        if self.obj_type != OsObjType::Timer {
            return Err(OsError::ObjType);
        }
        Ok(())
    }

    fn first_interval(&self) -> OsTick {
        if self.dly > 0 {
            self.dly
        } else {
            self.period
        }
    }
}

impl Default for OsTmr {
    fn default() -> Self {
        Self::new()
    }
}

struct TmrList {
    head: Option<NonNull<OsTmr>>,
}

unsafe impl Send for TmrList {}

impl TmrList {
    const fn new() -> Self {
        TmrList { head: None }
    }

    /// Insert ordered by ticks left until `match_tick`.
    fn insert(&mut self, tmr: NonNull<OsTmr>, now: OsTick) {
        let tmr_ref = unsafe { &mut *tmr.as_ptr() };
        let remain = tmr_ref.match_tick.wrapping_sub(now);

        let mut prev: Option<NonNull<OsTmr>> = None;
        let mut current = self.head;
        while let Some(cur_ptr) = current {
            let cur = unsafe { cur_ptr.as_ref() };
            if remain < cur.match_tick.wrapping_sub(now) {
                break;
            }
            prev = current;
            current = cur.next;
        }

        tmr_ref.prev = prev;
        tmr_ref.next = current;
        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next = Some(tmr) },
            None => self.head = Some(tmr),
        }
        if let Some(c) = current {
            unsafe { (*c.as_ptr()).prev = Some(tmr) };
        }
    }

    fn remove(&mut self, tmr: NonNull<OsTmr>) {
        let tmr_ref = unsafe { &mut *tmr.as_ptr() };
        match tmr_ref.prev {
            Some(p) => unsafe { (*p.as_ptr()).next = tmr_ref.next },
            None => self.head = tmr_ref.next,
        }
        if let Some(n) = tmr_ref.next {
            unsafe { (*n.as_ptr()).prev = tmr_ref.prev };
        }
        tmr_ref.next = None;
        tmr_ref.prev = None;
    }

    /// Pop the head if it is due at `now`.
    fn pop_expired(&mut self, now: OsTick) -> Option<NonNull<OsTmr>> {
        let head = self.head?;
        let due = unsafe { head.as_ref() }.match_tick;
        if now.wrapping_sub(due) < (1 << 31) {
            self.remove(head);
            Some(head)
        } else {
            None
        }
    }
}

static TMR_LIST: CsCell<TmrList> = CsCell::new(TmrList::new());
static TMR_SEM: Semaphore = Semaphore::new();

static mut TMR_TCB: OsTcb = OsTcb::new();
static mut TMR_STK: [OsStkElement; CFG_TMR_TASK_STK_SIZE] = [0; CFG_TMR_TASK_STK_SIZE];

/// Software timer usable from a `static`
pub struct Timer {
    inner: CsCell<OsTmr>,
}

impl Timer {
    pub const fn new() -> Self {
        Timer {
            inner: CsCell::new(OsTmr::new()),
        }
    }

    #[inline]
    fn node(&self, cs: &CriticalSection) -> NonNull<OsTmr> {
        NonNull::from(self.inner.get(cs))
    }

    /// Create a stopped timer
    ///
    /// Running timers are linked into the timer list, so only `'static`
    /// timers can be created.
    ///
    /// # Arguments
    /// * `dly` - Ticks before the first expiry
    /// * `period` - Ticks between expiries of a periodic timer
    /// * `tmr_opt` - [`opt::TMR_ONE_SHOT`] or [`opt::TMR_PERIODIC`]
    ///
    /// # Returns
    /// * `Err(OsError::TmrInvalidPeriod)` - One-shot without delay, or
    ///   periodic without period
    pub fn create(
        &'static self,
        name: &'static str,
        dly: OsTick,
        period: OsTick,
        tmr_opt: OsOpt,
        callback: OsTmrCallback,
        arg: usize,
    ) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::CreateIsr);
        }

        match tmr_opt {
            opt::TMR_ONE_SHOT if dly == 0 => return Err(OsError::TmrInvalidPeriod),
            opt::TMR_PERIODIC if period == 0 => return Err(OsError::TmrInvalidPeriod),
            opt::TMR_ONE_SHOT | opt::TMR_PERIODIC => {}
            _ => return Err(OsError::OptInvalid),
        }

        critical_section(|cs| {
            let tmr = self.inner.get(cs);
            if tmr.obj_type == OsObjType::Timer {
                return Err(OsError::ObjCreated);
            }
            *tmr = OsTmr::new();
            tmr.obj_type = OsObjType::Timer;
            tmr.name = name;
            tmr.callback = Some(callback);
            tmr.arg = arg;
            tmr.dly = dly;
            tmr.period = period;
            tmr.opt = tmr_opt;
            tmr.state = OsTmrState::Stopped;
            Ok(())
        })
    }

    /// Start the timer, restarting it if it is already running
    pub fn start(&self) -> OsResult<()> {
        critical_section(|cs| {
            let node = self.node(cs);
            let tmr = self.inner.get(cs);
            tmr.check()?;

            let list = TMR_LIST.get(cs);
            if tmr.state == OsTmrState::Running {
                list.remove(node);
            }

            let now = kernel::KERNEL.tick_get();
            tmr.match_tick = now.wrapping_add(tmr.first_interval());
            tmr.state = OsTmrState::Running;
            list.insert(node, now);
            Ok(())
        })
    }

    /// Stop the timer; stopping an idle timer is not an error
    pub fn stop(&self) -> OsResult<()> {
        critical_section(|cs| {
            let node = self.node(cs);
            let tmr = self.inner.get(cs);
            tmr.check()?;

            if tmr.state == OsTmrState::Running {
                TMR_LIST.get(cs).remove(node);
                tmr.state = OsTmrState::Stopped;
            }
            Ok(())
        })
    }

    /// Change delay and period
    ///
    /// A running timer restarts with the new timing, a stopped one stays
    /// stopped.
    pub fn set(&self, dly: OsTick, period: OsTick) -> OsResult<()> {
        let running = critical_section(|cs| {
            let tmr = self.inner.get(cs);
            tmr.check()?;

            let invalid = match tmr.opt {
                opt::TMR_ONE_SHOT => dly == 0,
                _ => period == 0,
            };
            if invalid {
                return Err(OsError::TmrInvalidPeriod);
            }

            tmr.dly = dly;
            tmr.period = period;
            Ok(tmr.state == OsTmrState::Running)
        })?;

        if running {
            self.start()?;
        }
        Ok(())
    }

    /// Delete the timer, stopping it first
    pub fn del(&self) -> OsResult<()> {
        if is_isr_context() {
            return Err(OsError::DelIsr);
        }

        critical_section(|cs| {
            let node = self.node(cs);
            let tmr = self.inner.get(cs);
            tmr.check()?;

            if tmr.state == OsTmrState::Running {
                TMR_LIST.get(cs).remove(node);
            }
            *tmr = OsTmr::new();
            Ok(())
        })
    }

    pub fn state(&self) -> OsTmrState {
        critical_section(|cs| self.inner.get(cs).state)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == OsTmrState::Running
    }

    /// Ticks left before the next expiry
    pub fn remaining(&self) -> OsResult<OsTick> {
        critical_section(|cs| {
            let tmr = self.inner.get(cs);
            tmr.check()?;
            if tmr.state != OsTmrState::Running {
                return Err(OsError::TmrInactive);
            }
            Ok(tmr.match_tick.wrapping_sub(kernel::KERNEL.tick_get()))
        })
    }

    pub fn name(&self) -> &'static str {
        critical_section(|cs| self.inner.get(cs).name)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Take the next due timer and re-arm it if periodic.
fn os_tmr_next_expired() -> Option<(OsTmrCallback, usize)> {
    critical_section(|cs| {
        let list = TMR_LIST.get(cs);
        let now = kernel::KERNEL.tick_get();
        let node = list.pop_expired(now)?;
        let tmr = unsafe { &mut *node.as_ptr() };

        if tmr.opt == opt::TMR_PERIODIC {
            tmr.match_tick = tmr.match_tick.wrapping_add(tmr.period);
            list.insert(node, now);
        } else {
            tmr.state = OsTmrState::Completed;
        }

        tmr.callback.map(|cb| (cb, tmr.arg))
    })
}

fn os_tmr_task(_: *mut ()) -> ! {
    loop {
        if TMR_SEM.wait(0, opt::PEND_BLOCKING).is_err() {
            continue;
        }

        while let Some((callback, arg)) = os_tmr_next_expired() {
            callback(arg);
        }
    }
}

/// Wake the timer task; called once per tick.
pub(crate) fn os_tmr_signal() {
    let _ = TMR_SEM.signal(opt::POST_NO_SCHED);
}

/// Reset the timer list and create the timer task
#[allow(static_mut_refs)]
pub(crate) fn os_tmr_init() -> OsResult<()> {
    critical_section(|cs| *TMR_LIST.get(cs) = TmrList::new());

    if TMR_SEM.is_created() {
        TMR_SEM.del()?;
    }
    TMR_SEM.create(0, "TmrSem")?;

    unsafe {
        crate::task::os_task_create_raw(
            &raw mut TMR_TCB,
            "Tmr",
            os_tmr_task,
            core::ptr::null_mut(),
            CFG_TMR_TASK_PRIO,
            TMR_STK.as_mut_ptr(),
            TMR_STK.len(),
            CFG_TIME_QUANTA_DEFAULT,
            opt::TASK_NONE,
        )
    }
}
