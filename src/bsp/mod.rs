//! Board support: bus managers and peripheral registries
//!
//! Every registry is a fixed-capacity, generation-tagged table generic over
//! the [`Osal`](crate::osal::Osal) backend. Peripheral glue implements one of
//! the HAL traits ([`bus::BusHal`], [`uart::UartHal`], [`adc::AdcHal`],
//! [`pwm::PwmHal`]) and forwards its interrupt callbacks to the registry's
//! `on_*` / `complete` entry points.

use crate::osal::OsalError;

pub mod adc;
pub mod arena;
pub mod bus;
pub mod double_buffer;
pub mod exti;
pub mod i2c;
pub mod pwm;
pub mod spi;
pub mod uart;

pub use arena::{Arena, Key};
pub use double_buffer::{DoubleBuffer, RxSlot};

/// How a transfer is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferMode {
    /// Synchronous, returns when the hardware is done
    Blocking,
    /// Interrupt driven, completion reported from the ISR
    Interrupt,
    /// DMA driven, completion reported from the ISR
    Dma,
}

impl TransferMode {
    #[inline]
    pub fn is_async(self) -> bool {
        self != TransferMode::Blocking
    }
}

/// One physical peripheral instance (SPI1, USART6, ADC1 ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralId(pub u8);

/// Failure reported by peripheral glue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    Busy,
    Nack,
    Overrun,
    Parity,
    Other,
}

impl From<HalError> for OsalError {
    fn from(_e: HalError) -> Self {
        crate::warn!("hal error: {}", _e);
        OsalError::Error
    }
}
