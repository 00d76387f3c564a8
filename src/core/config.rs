//! Compile-time configuration
//!
//! These constants bound every kernel resource and every fixed-capacity
//! table of the board support layer. Nothing is allocated at run time.

// ============ Kernel ============

/// Maximum number of priority levels
pub const CFG_PRIO_MAX: usize = 64;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Default time quanta for round-robin scheduling
pub const CFG_TIME_QUANTA_DEFAULT: u32 = 10;

/// Minimum task stack size in words
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Number of entries in tick wheel
pub const CFG_TICK_WHEEL_SIZE: usize = 16;

/// Enable round-robin scheduling for same-priority tasks
pub const CFG_SCHED_ROUND_ROBIN_EN: bool = true;

/// Idle task priority
pub const CFG_PRIO_IDLE: u8 = (CFG_PRIO_MAX - 1) as u8;

/// Timer service task priority
pub const CFG_TMR_TASK_PRIO: u8 = 2;

/// Timer service task stack size in words
pub const CFG_TMR_TASK_STK_SIZE: usize = 256;

/// Core clock feeding SysTick and the cycle counter
pub const CFG_CPU_CLOCK_HZ: u32 = 16_000_000;

// ============ Board support capacities ============

/// Number of UART instances that can be registered at once
pub const CFG_UART_MAX_INSTANCES: usize = 3;

/// Capacity of one UART receive slot in bytes
pub const CFG_UART_RX_BUF_SIZE: usize = 256;

/// Number of physical SPI buses
pub const CFG_SPI_BUS_NUM: usize = 2;

/// Devices per SPI bus
pub const CFG_SPI_DEVICES_PER_BUS: usize = 4;

/// Number of PWM channels that can be registered at once
pub const CFG_PWM_MAX_DEVICES: usize = 10;

/// Number of physical I2C buses
pub const CFG_I2C_BUS_NUM: usize = 2;

/// Devices per I2C bus
pub const CFG_I2C_DEVICES_PER_BUS: usize = 4;

/// External interrupt lines, one device per line
pub const CFG_EXTI_MAX_DEVICES: usize = 16;

/// Number of ADC peripherals that can be registered at once
pub const CFG_ADC_MAX_DEVICES: usize = 4;

/// Conversion channels per ADC
pub const CFG_ADC_MAX_CHANNELS: usize = 16;
