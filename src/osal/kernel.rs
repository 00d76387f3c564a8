//! Primitive layer bound to the in-tree kernel
//!
//! `WAIT_FOREVER` maps to the kernel's "pend forever" (0) and `NO_WAIT` to a
//! non-blocking pend.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::config::{CFG_PRIO_IDLE, CFG_STK_SIZE_MIN};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::flag::FlagGroup;
use crate::mutex::Mutex;
use crate::sem::Semaphore;
use crate::task::{self, OsTcb};
use crate::time;
use crate::tmr::Timer;
use crate::types::{opt, OsObjType, OsOpt, OsTick};

use super::delay::{self, DwtCounter};
use super::{
    ms_to_ticks, EventFlags, Osal, OsalError, OsalEvent, OsalMutex, OsalResult, OsalSemaphore,
    OsalThread, OsalTimer, ThreadEntry, Tick, TimerCallback, TimerMode, WaitMode, NO_WAIT,
    WAIT_FOREVER,
};

/// In-tree kernel backend
pub struct Kernel;

impl Osal for Kernel {
    type Thread = KernelThread;
    type Mutex = KernelMutex;
    type Semaphore = KernelSemaphore;
    type Event = KernelEvent;
    type Timer = KernelTimer;

    fn delay_ms(ms: u32) {
        if crate::kernel::KERNEL.is_running() && !is_isr_context() {
            if time::os_time_dly(ms_to_ticks(ms)).is_ok() {
                return;
            }
        }
        // Scheduler locked, in an ISR or not started yet
        for _ in 0..ms {
            Self::delay_us(1000);
        }
    }

    fn delay_us(us: u32) {
        delay::delay_us::<DwtCounter>(us);
    }

    fn tick_count() -> Tick {
        time::os_time_get()
    }

    fn in_isr() -> bool {
        is_isr_context()
    }
}

/// Split an OSAL timeout into kernel ticks and pend options
fn pend_args(timeout: Tick) -> (OsTick, OsOpt) {
    match timeout {
        NO_WAIT => (0, opt::PEND_NON_BLOCKING),
        WAIT_FOREVER => (0, opt::PEND_BLOCKING),
        ticks => (ticks, opt::PEND_BLOCKING),
    }
}

// ============ Thread ============

struct ThreadBody {
    entry: Option<ThreadEntry>,
    arg: usize,
}

pub struct KernelThread {
    tcb: UnsafeCell<OsTcb>,
    body: CsCell<ThreadBody>,
}

// SAFETY: the TCB is only touched by the kernel with interrupts masked.
unsafe impl Sync for KernelThread {}

impl KernelThread {
    fn tcb(&self) -> NonNull<OsTcb> {
        // SAFETY: UnsafeCell::get never returns null.
        unsafe { NonNull::new_unchecked(self.tcb.get()) }
    }

    fn is_created(&self) -> bool {
        critical_section(|_cs| unsafe { self.tcb().as_ref() }.obj_type == OsObjType::Task)
    }
}

/// Runs the registered entry and deletes the task when it returns
fn thread_trampoline(arg: *mut ()) -> ! {
    // SAFETY: `arg` is the `&'static KernelThread` passed by `create`.
    let thread = unsafe { &*(arg as *const KernelThread) };
    let (entry, entry_arg) = critical_section(|cs| {
        let body = thread.body.get(cs);
        (body.entry, body.arg)
    });

    if let Some(entry) = entry {
        entry(entry_arg);
    }

    let _ = task::os_task_del(None);
    loop {
        core::hint::spin_loop();
    }
}

impl OsalThread for KernelThread {
    const INIT: Self = KernelThread {
        tcb: UnsafeCell::new(OsTcb::new()),
        body: CsCell::new(ThreadBody {
            entry: None,
            arg: 0,
        }),
    };

    fn create(
        &'static self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        stack: &'static mut [u32],
        priority: u8,
    ) -> OsalResult {
        if priority >= CFG_PRIO_IDLE || stack.len() < CFG_STK_SIZE_MIN {
            return Err(OsalError::InvalidParam);
        }
        if self.is_created() {
            return Err(OsalError::Error);
        }

        critical_section(|cs| {
            let body = self.body.get(cs);
            body.entry = Some(entry);
            body.arg = arg;
        });

        // SAFETY: the TCB and stack are 'static and the TCB is unused.
        unsafe {
            task::os_task_create_raw(
                self.tcb.get(),
                name,
                thread_trampoline,
                self as *const Self as *mut (),
                priority,
                stack.as_mut_ptr(),
                stack.len(),
                crate::config::CFG_TIME_QUANTA_DEFAULT,
                opt::TASK_DONT_START,
            )?;
        }
        Ok(())
    }

    fn start(&self) -> OsalResult {
        task::os_task_resume(self.tcb())?;
        Ok(())
    }

    fn stop(&self) -> OsalResult {
        let suspended = critical_section(|_cs| unsafe { self.tcb().as_ref() }.is_suspended());
        if suspended {
            return Ok(());
        }
        task::os_task_suspend(Some(self.tcb()))?;
        Ok(())
    }

    fn delete(&self) -> OsalResult {
        task::os_task_del(Some(self.tcb()))?;
        Ok(())
    }
}

// ============ Mutex ============

pub struct KernelMutex(Mutex);

impl OsalMutex for KernelMutex {
    const INIT: Self = KernelMutex(Mutex::new());

    fn create(&self, name: &'static str) -> OsalResult {
        self.0.create(name)?;
        Ok(())
    }

    fn lock(&self, timeout: Tick) -> OsalResult {
        let (ticks, pend_opt) = pend_args(timeout);
        self.0.lock(ticks, pend_opt)?;
        Ok(())
    }

    fn unlock(&self) -> OsalResult {
        self.0.unlock(opt::NONE)?;
        Ok(())
    }

    fn delete(&self) -> OsalResult {
        self.0.del()?;
        Ok(())
    }
}

// ============ Semaphore ============

pub struct KernelSemaphore(Semaphore);

impl OsalSemaphore for KernelSemaphore {
    const INIT: Self = KernelSemaphore(Semaphore::new());

    fn create(&self, name: &'static str, initial: u32) -> OsalResult {
        self.0.create(initial, name)?;
        Ok(())
    }

    fn wait(&self, timeout: Tick) -> OsalResult {
        let (ticks, pend_opt) = pend_args(timeout);
        self.0.wait(ticks, pend_opt)?;
        Ok(())
    }

    fn post(&self) -> OsalResult {
        self.0.signal(opt::POST_FIFO)?;
        Ok(())
    }

    fn post_from_isr(&self) -> OsalResult {
        self.0.signal(opt::POST_NO_SCHED)?;
        Ok(())
    }

    fn delete(&self) -> OsalResult {
        self.0.del()?;
        Ok(())
    }
}

// ============ Event ============

pub struct KernelEvent(FlagGroup);

impl OsalEvent for KernelEvent {
    const INIT: Self = KernelEvent(FlagGroup::new());

    fn create(&self, name: &'static str) -> OsalResult {
        self.0.create(0, name)?;
        Ok(())
    }

    fn set(&self, flags: EventFlags) -> OsalResult {
        self.0.post(flags, opt::FLAG_SET)?;
        Ok(())
    }

    fn clear(&self, flags: EventFlags) -> OsalResult {
        self.0.post(flags, opt::FLAG_CLR)?;
        Ok(())
    }

    fn wait(
        &self,
        requested: EventFlags,
        mode: WaitMode,
        clear_on_exit: bool,
        timeout: Tick,
    ) -> OsalResult<EventFlags> {
        if requested == 0 {
            return Err(OsalError::InvalidParam);
        }

        let (ticks, mut pend_opt) = pend_args(timeout);
        pend_opt |= match mode {
            WaitMode::Any => opt::FLAG_SET_ANY,
            WaitMode::All => opt::FLAG_SET_ALL,
        };
        if clear_on_exit {
            pend_opt |= opt::FLAG_CONSUME;
        }

        Ok(self.0.pend(requested, ticks, pend_opt)?)
    }

    fn get(&self) -> OsalResult<EventFlags> {
        Ok(self.0.flags()?)
    }

    fn delete(&self) -> OsalResult {
        self.0.del()?;
        Ok(())
    }
}

// ============ Timer ============

pub struct KernelTimer {
    tmr: Timer,
    mode: CsCell<TimerMode>,
}

impl KernelTimer {
    /// Kernel (delay, period) for a period in ticks
    fn timing(mode: TimerMode, ticks: OsTick) -> (OsTick, OsTick) {
        match mode {
            TimerMode::OneShot => (ticks, 0),
            TimerMode::Periodic => (0, ticks),
        }
    }
}

impl OsalTimer for KernelTimer {
    const INIT: Self = KernelTimer {
        tmr: Timer::new(),
        mode: CsCell::new(TimerMode::OneShot),
    };

    fn create(
        &'static self,
        name: &'static str,
        callback: TimerCallback,
        arg: usize,
        period_ms: u32,
        mode: TimerMode,
    ) -> OsalResult {
        if period_ms == 0 {
            return Err(OsalError::InvalidParam);
        }

        let (dly, period) = Self::timing(mode, ms_to_ticks(period_ms));
        let tmr_opt = match mode {
            TimerMode::OneShot => opt::TMR_ONE_SHOT,
            TimerMode::Periodic => opt::TMR_PERIODIC,
        };
        self.tmr.create(name, dly, period, tmr_opt, callback, arg)?;
        critical_section(|cs| *self.mode.get(cs) = mode);
        Ok(())
    }

    fn start(&self) -> OsalResult {
        self.tmr.start()?;
        Ok(())
    }

    fn stop(&self) -> OsalResult {
        self.tmr.stop()?;
        Ok(())
    }

    fn change_period(&self, period_ms: u32) -> OsalResult {
        if period_ms == 0 {
            return Err(OsalError::InvalidParam);
        }
        let mode = critical_section(|cs| *self.mode.get(cs));
        let (dly, period) = Self::timing(mode, ms_to_ticks(period_ms));
        self.tmr.set(dly, period)?;
        Ok(())
    }

    fn delete(&self) -> OsalResult {
        self.tmr.del()?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.tmr.is_running()
    }
}
