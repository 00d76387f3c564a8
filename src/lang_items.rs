//! Language items and default exception handlers

// Firmware builds only; host builds link std's panic machinery
#[cfg(all(feature = "defmt", target_arch = "arm", not(feature = "host")))]
use defmt_rtt as _;

#[cfg(all(feature = "defmt", target_arch = "arm", not(feature = "host")))]
use panic_probe as _;

#[cfg(all(feature = "defmt", target_arch = "arm", not(feature = "host")))]
#[defmt::panic_handler]
fn defmt_panic() -> ! {
    cortex_m::asm::udf()
}

#[cfg(all(not(feature = "defmt"), target_arch = "arm", not(feature = "host")))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop { cortex_m::asm::udf(); }
}

#[cfg(all(target_arch = "arm", not(feature = "host")))]
#[cortex_m_rt::exception]
unsafe fn HardFault(_ef: &cortex_m_rt::ExceptionFrame) -> ! {
    loop { cortex_m::asm::udf(); }
}

// Log timestamp in kernel ticks
#[cfg(all(feature = "defmt", target_arch = "arm", not(feature = "host")))]
defmt::timestamp!("{=u32}", crate::core::kernel::KERNEL.tick_get());
