//! Global kernel state and initialization
//!
//! Owns the scheduler tables (priority bitmap, ready lists, tick wheel), the
//! context-switch handoff read by the port, and kernel start-up.

use core::ptr::NonNull;

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{CFG_PRIO_IDLE, CFG_PRIO_MAX, CFG_TICK_RATE_HZ, CFG_TICK_WHEEL_SIZE};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, CriticalSection};
use crate::error::{OsError, OsResult};
use crate::prio::PrioTable;
use crate::sched::ReadyList;
use crate::task::OsTcb;
use crate::types::{opt, OsNestingCtr, OsPrio, OsStkElement, OsTick};

/// Run state and counters, readable without a critical section
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    tick_counter: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            tick_counter: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.int_nesting.store(0, Ordering::SeqCst);
        self.tick_counter.store(0, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> OsTick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[inline(always)]
    fn int_enter(&self) {
        if self.is_running() {
            let _ = self
                .int_nesting
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1));
        }
    }

    #[inline(always)]
    fn int_nesting_dec(&self) -> OsNestingCtr {
        let prev = self
            .int_nesting
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }
}

pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// Scheduler state
pub struct SchedState {
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) tick_wheel: [Option<NonNull<OsTcb>>; CFG_TICK_WHEEL_SIZE],
}

// SAFETY: the wheel links point at TCBs the kernel owns for their whole
// lifetime, and `SCHED` is only reached through a critical section.
unsafe impl Send for SchedState {}

impl SchedState {
    const fn new() -> Self {
        Self {
            prio_tbl: PrioTable::new(),
            rdy_list: [ReadyList::new(); CFG_PRIO_MAX],
            tick_wheel: [None; CFG_TICK_WHEEL_SIZE],
        }
    }

    fn reset(&mut self) {
        self.prio_tbl.clear();
        self.rdy_list = [ReadyList::new(); CFG_PRIO_MAX];
        self.tick_wheel = [None; CFG_TICK_WHEEL_SIZE];
    }

    #[inline(always)]
    fn tick_wheel_slot(tick: u32) -> usize {
        (tick as usize) % CFG_TICK_WHEEL_SIZE
    }

    /// Link a task into the wheel slot of `expiry_tick`.
    ///
    /// # Safety
    /// `tcb` must be valid and not already on the wheel.
    unsafe fn tick_wheel_insert(&mut self, tcb: NonNull<OsTcb>, expiry_tick: u32) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        let slot = Self::tick_wheel_slot(expiry_tick);

        tcb_ref.tick_wheel_slot = slot as u8;
        tcb_ref.tick_next_ptr = self.tick_wheel[slot];
        tcb_ref.tick_prev_ptr = None;
        tcb_ref.on_tick_wheel = true;

        if let Some(mut old_head) = self.tick_wheel[slot] {
            unsafe { old_head.as_mut().tick_prev_ptr = Some(tcb) };
        }

        self.tick_wheel[slot] = Some(tcb);
    }

    /// Unlink a task from the wheel; no-op when it is not linked.
    ///
    /// # Safety
    /// `tcb` must be valid.
    unsafe fn tick_wheel_remove(&mut self, tcb: NonNull<OsTcb>) {
        let tcb_ref = unsafe { &mut *tcb.as_ptr() };
        if !tcb_ref.on_tick_wheel {
            return;
        }
        let slot = tcb_ref.tick_wheel_slot as usize;

        match tcb_ref.tick_prev_ptr {
            Some(mut prev) => unsafe { prev.as_mut().tick_next_ptr = tcb_ref.tick_next_ptr },
            None => self.tick_wheel[slot] = tcb_ref.tick_next_ptr,
        }

        if let Some(mut next) = tcb_ref.tick_next_ptr {
            unsafe { next.as_mut().tick_prev_ptr = tcb_ref.tick_prev_ptr };
        }

        tcb_ref.tick_next_ptr = None;
        tcb_ref.tick_prev_ptr = None;
        tcb_ref.on_tick_wheel = false;
    }
}

pub(crate) static SCHED: CsCell<SchedState> = CsCell::new(SchedState::new());

static mut IDLE_TCB: OsTcb = OsTcb::new();
static mut IDLE_STK: [OsStkElement; 128] = [0; 128];

/// Context switch handoff shared with the port's PendSV handler
#[repr(C)]
pub struct CpuState {
    pub tcb_cur: *mut OsTcb,
    /// Switch target, copied into `tcb_cur` by PendSV
    pub tcb_high_rdy: *mut OsTcb,
    pub prio_cur: OsPrio,
    pub prio_high_rdy: OsPrio,
}

impl CpuState {
    pub const fn new() -> Self {
        Self {
            tcb_cur: core::ptr::null_mut(),
            tcb_high_rdy: core::ptr::null_mut(),
            prio_cur: 0,
            prio_high_rdy: 0,
        }
    }
}

/// Read and written by PendSV by symbol
#[no_mangle]
#[used]
pub static mut CPU_STATE: CpuState = CpuState::new();

fn os_idle_task(_: *mut ()) -> ! {
    loop {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfi();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

#[allow(static_mut_refs)]
unsafe fn os_reset_globals() {
    KERNEL.reset();
    unsafe {
        CPU_STATE = CpuState::new();
        SCHED.get_unchecked().reset();
    }
}

/// Initialize the kernel
///
/// Must be called before any other kernel function. Creates the idle task
/// and, with the `tmr` feature, the timer service task.
///
/// # Returns
/// * `Ok(())` - Initialization successful
/// * `Err(OsError::OsRunning)` - Kernel is already running
#[allow(static_mut_refs)]
pub fn os_init() -> OsResult<()> {
    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|_cs| unsafe { os_reset_globals() });

    unsafe {
        crate::task::os_task_create_raw(
            &raw mut IDLE_TCB,
            "Idle",
            os_idle_task,
            core::ptr::null_mut(),
            CFG_PRIO_IDLE,
            IDLE_STK.as_mut_ptr(),
            IDLE_STK.len(),
            0,
            opt::TASK_NONE,
        )?;
    }

    #[cfg(feature = "tmr")]
    crate::tmr::os_tmr_init()?;

    KERNEL.initialized.store(true, Ordering::SeqCst);
    crate::info!("kernel initialized");
    Ok(())
}

/// Start multitasking
///
/// Starts the highest priority ready task. Does not return on the target;
/// without a CPU port it returns `Ok` with nothing switched.
///
/// # Returns
/// * `Err(OsError::OsNotInit)` - Kernel not initialized
/// * `Err(OsError::OsRunning)` - Kernel is already running
/// * `Err(OsError::OsNoAppTask)` - No ready task to start
#[allow(static_mut_refs)]
pub fn os_start() -> OsResult<()> {
    if !KERNEL.is_initialized() {
        return Err(OsError::OsNotInit);
    }

    if KERNEL.is_running() {
        return Err(OsError::OsRunning);
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);
        let high_prio = sched.prio_tbl.get_highest();
        let head = sched.rdy_list[high_prio as usize]
            .head()
            .ok_or(OsError::OsNoAppTask)?;

        unsafe {
            CPU_STATE.prio_high_rdy = high_prio;
            CPU_STATE.prio_cur = high_prio;
            CPU_STATE.tcb_high_rdy = head.as_ptr();
        }

        KERNEL.running.store(true, Ordering::SeqCst);
        Ok(())
    })?;

    crate::port::os_cpu_cycle_counter_init();
    crate::port::os_cpu_systick_init(crate::config::CFG_CPU_CLOCK_HZ / CFG_TICK_RATE_HZ);

    unsafe { crate::port::os_start_high_rdy() };

    Ok(())
}

/// Notify the kernel that an interrupt handler was entered
///
/// Pair with [`os_int_exit`] so a handler that readies a task switches to it
/// on the way out.
#[inline]
pub fn os_int_enter() {
    KERNEL.int_enter();
}

/// Leave an interrupt handler, switching tasks if a higher one became ready
#[allow(static_mut_refs)]
pub fn os_int_exit() {
    if !KERNEL.is_running() {
        return;
    }

    let _cs = CriticalSection::enter();

    if KERNEL.int_nesting() == 0 {
        return;
    }

    if KERNEL.int_nesting_dec() == 0 {
        unsafe {
            let high_prio = prio_table().get_highest();
            if let Some(head) = rdy_list(high_prio).head() {
                if head.as_ptr() != CPU_STATE.tcb_cur {
                    CPU_STATE.prio_high_rdy = high_prio;
                    CPU_STATE.tcb_high_rdy = head.as_ptr();
                    crate::port::os_int_ctx_sw();
                }
            }
        }
    }
}

// Accessors for the scheduler tables. Callers mask interrupts.

#[inline(always)]
pub(crate) unsafe fn prio_table() -> &'static mut PrioTable {
    unsafe { &mut SCHED.get_unchecked().prio_tbl }
}

#[inline(always)]
pub(crate) unsafe fn rdy_list(prio: OsPrio) -> &'static mut ReadyList {
    unsafe { &mut SCHED.get_unchecked().rdy_list[prio as usize] }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn tcb_cur_ptr() -> Option<NonNull<OsTcb>> {
    unsafe { NonNull::new(CPU_STATE.tcb_cur) }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_tcb_high_rdy_ptr(tcb: Option<NonNull<OsTcb>>) {
    unsafe { CPU_STATE.tcb_high_rdy = tcb.map_or(core::ptr::null_mut(), |p| p.as_ptr()) }
}

#[inline]
#[allow(static_mut_refs)]
pub(crate) unsafe fn set_prio_high_rdy(prio: OsPrio) {
    unsafe { CPU_STATE.prio_high_rdy = prio }
}

pub(crate) unsafe fn tick_wheel_insert(tcb: NonNull<OsTcb>, expiry_tick: u32) {
    unsafe { SCHED.get_unchecked().tick_wheel_insert(tcb, expiry_tick) }
}

pub(crate) unsafe fn tick_wheel_remove(tcb: NonNull<OsTcb>) {
    unsafe { SCHED.get_unchecked().tick_wheel_remove(tcb) }
}

#[inline]
pub(crate) unsafe fn tick_wheel_head(slot: usize) -> Option<NonNull<OsTcb>> {
    unsafe { SCHED.get_unchecked().tick_wheel[slot] }
}
