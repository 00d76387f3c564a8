//! Microsecond busy-wait over a free-running cycle counter

/// A free-running up-counter that wraps at `u32::MAX`
pub trait CycleCounter {
    /// Counter frequency in Hz
    fn frequency() -> u32;

    fn cycles() -> u32;
}

/// DWT `CYCCNT` on Cortex-M, enabled by the port when the kernel starts
pub struct DwtCounter;

impl CycleCounter for DwtCounter {
    #[inline]
    fn frequency() -> u32 {
        crate::config::CFG_CPU_CLOCK_HZ
    }

    #[inline]
    fn cycles() -> u32 {
        crate::port::os_cpu_cycle_count()
    }
}

/// Spin for `us` microseconds
///
/// Long waits are split so every spin stays below half the counter range.
pub fn delay_us<C: CycleCounter>(us: u32) {
    let per_us = (C::frequency() / 1_000_000).max(1);
    let max_chunk = (u32::MAX / 2) / per_us;

    let mut left = us;
    while left > 0 {
        let chunk = left.min(max_chunk);
        spin_cycles::<C>(chunk * per_us);
        left -= chunk;
    }
}

fn spin_cycles<C: CycleCounter>(cycles: u32) {
    let start = C::cycles();
    while C::cycles().wrapping_sub(start) < cycles {
        core::hint::spin_loop();
    }
}
