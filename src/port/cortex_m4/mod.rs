//! Cortex-M4 port implementation
//!
//! Context switching via the PendSV exception, SysTick as the kernel tick and
//! the DWT cycle counter for sub-tick delays.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{DWT, SCB};

use crate::kernel::CPU_STATE;
use crate::task::OsTaskFn;
use crate::types::{OsOpt, OsStkElement};

/// Lowest configurable priority on a 4-bit NVIC
const KERNEL_EXC_PRIO: u8 = 0xF0;

/// Words in an initial task frame
const TASK_FRAME_WORDS: usize = 17;

/// Handler mode stack, MSP is moved here when the kernel starts
#[no_mangle]
static mut ISR_STACK: [u64; 256] = [0; 256];

/// Program SysTick to fire every `cnts` core cycles
pub fn os_cpu_systick_init(cnts: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.set_reload(cnts.saturating_sub(1));
    p.SYST.clear_current();
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Enable the DWT cycle counter
pub fn os_cpu_cycle_counter_init() {
    let mut p = unsafe { cortex_m::Peripherals::steal() };
    p.DCB.enable_trace();
    p.DWT.enable_cycle_counter();
}

/// Current core cycle count, wraps at `u32::MAX`
#[inline(always)]
pub fn os_cpu_cycle_count() -> u32 {
    DWT::cycle_count()
}

/// Hand the CPU to the first task
///
/// Moves MSP to the handler stack, clears PSP so PendSV knows there is no
/// outgoing context, then pends PendSV.
#[no_mangle]
#[allow(static_mut_refs)]
pub unsafe extern "C" fn os_start_high_rdy() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;
        scb.set_priority(SystemHandler::PendSV, KERNEL_EXC_PRIO);
        scb.set_priority(SystemHandler::SysTick, KERNEL_EXC_PRIO);

        let msp_top = ISR_STACK.as_ptr().add(ISR_STACK.len()) as u32;
        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0);

        CPU_STATE.tcb_cur = core::ptr::null_mut();

        cortex_m::interrupt::enable();
        SCB::set_pendsv();
    }
}

/// Request a context switch from task level
#[inline(always)]
pub fn os_ctx_sw() {
    SCB::set_pendsv();
}

/// Request a context switch on interrupt exit
#[inline(always)]
pub fn os_int_ctx_sw() {
    SCB::set_pendsv();
}

/// Initial task frame: the software saved registers followed by the
/// hardware exception frame
#[repr(C, align(4))]
struct TaskFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Build the first frame of a task so PendSV can "return" into it
///
/// # Safety
/// `stk_base..stk_base + stk_size` must be a writable stack owned by the task.
pub unsafe fn os_task_stk_init(
    task_fn: OsTaskFn,
    arg: *mut (),
    stk_base: *mut OsStkElement,
    stk_size: usize,
    _opt: OsOpt,
) -> *mut OsStkElement {
    unsafe {
        let stk_top = stk_base.add(stk_size);
        let stk_aligned = ((stk_top as usize) & !7) as *mut u32;
        let frame = stk_aligned.sub(TASK_FRAME_WORDS) as *mut TaskFrame;

        frame.write(TaskFrame {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            // thread mode, PSP, no FPU context
            exc_return: 0xFFFF_FFFD,
            r0: arg as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: os_task_return as *const () as u32,
            pc: (task_fn as usize as u32) | 1,
            xpsr: 0x0100_0000,
        });

        // PendSV skips one word before popping
        (frame as *mut u32).sub(1) as *mut OsStkElement
    }
}

/// Save the outgoing stack pointer and return the incoming one
#[inline(never)]
#[no_mangle]
#[allow(static_mut_refs)]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        if let Some(cur) = CPU_STATE.tcb_cur.as_mut() {
            cur.stk_ptr = cur_sp;
        }

        CPU_STATE.tcb_cur = CPU_STATE.tcb_high_rdy;
        CPU_STATE.prio_cur = CPU_STATE.prio_high_rdy;

        match CPU_STATE.tcb_cur.as_ref() {
            Some(next) => next.stk_ptr,
            None => core::ptr::null_mut(),
        }
    }
}

/// PendSV exception handler
///
/// Pushes R4-R11 and EXC_RETURN onto the outgoing PSP unless no task ran
/// yet, swaps TCBs, then pops the same set from the incoming stack.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={cpu_state}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",
        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",
        "bx lr",

        cpu_state = sym CPU_STATE,
    );
}

/// Landing pad for a task function that returns
#[no_mangle]
fn os_task_return() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
