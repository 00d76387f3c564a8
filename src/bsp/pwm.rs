//! PWM outputs
//!
//! Duty is given in tenths of a percent (0..=1000). The timer's prescaler
//! grows until the period fits its 16-bit auto-reload register.

use crate::config::CFG_PWM_MAX_DEVICES;
use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::osal::{OsalError, OsalResult};

use super::arena::{Arena, Key};
use super::{HalError, PeripheralId, TransferMode};

/// 100.0 %
pub const DUTY_MAX: u16 = 1000;

const RELOAD_MAX: u64 = 0xFFFF;

/// Peripheral glue for one timer
pub trait PwmHal: Sync + 'static {
    fn id(&self) -> PeripheralId;

    /// Timer input clock in Hz
    fn timer_clock(&self) -> u32;

    /// Program the prescaler and auto-reload registers
    fn set_timebase(&self, timebase: Timebase) -> Result<(), HalError>;

    fn set_compare(&self, channel: u8, pulse: u32);

    fn start(&self, channel: u8, mode: TransferMode) -> Result<(), HalError>;

    fn stop(&self, channel: u8, mode: TransferMode) -> Result<(), HalError>;
}

/// Register values, each one less than the divider it encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timebase {
    pub prescaler: u32,
    pub period: u32,
}

impl Timebase {
    /// Timebase for `frequency` Hz on a `clock` Hz timer
    pub fn for_frequency(clock: u32, frequency: u32) -> OsalResult<Self> {
        if frequency == 0 || frequency > clock {
            return Err(OsalError::InvalidParam);
        }
        let clock = clock as u64;
        let frequency = frequency as u64;

        // Smallest prescaler with clock / (f * p) <= 0xFFFF
        let prescaler = (clock / (frequency * (RELOAD_MAX + 1)) + 1).min(RELOAD_MAX);
        let period = (clock / (frequency * prescaler)).max(1);
        // Too slow for the widest divider
        if period > RELOAD_MAX + 1 {
            return Err(OsalError::InvalidParam);
        }

        Ok(Timebase {
            prescaler: (prescaler - 1) as u32,
            period: (period - 1) as u32,
        })
    }

    /// Compare value for a duty in tenths of a percent
    pub fn pulse(&self, duty_x10: u16) -> u32 {
        (self.period as u64 * duty_x10 as u64 / DUTY_MAX as u64) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmConfig {
    pub channel: u8,
    pub frequency: u32,
    pub duty_x10: u16,
    pub mode: TransferMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmHandle(Key);

struct PwmDevice<H: 'static> {
    hal: &'static H,
    config: PwmConfig,
    timebase: Timebase,
}

impl<H> Clone for PwmDevice<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for PwmDevice<H> {}

pub struct PwmRegistry<H: PwmHal, const N: usize = CFG_PWM_MAX_DEVICES> {
    devices: CsCell<Arena<PwmDevice<H>, N>>,
}

impl<H: PwmHal, const N: usize> PwmRegistry<H, N> {
    pub const fn new() -> Self {
        PwmRegistry {
            devices: CsCell::new(Arena::new()),
        }
    }

    /// Program the timer and register the output, stopped
    ///
    /// # Returns
    /// * `Err(OsalError::InvalidParam)` - Duty above [`DUTY_MAX`], frequency
    ///   zero or above the timer clock
    /// * `Err(OsalError::ResourceExhausted)` - All `N` outputs in use
    pub fn register(&self, hal: &'static H, config: PwmConfig) -> OsalResult<PwmHandle> {
        if config.duty_x10 > DUTY_MAX {
            return Err(OsalError::InvalidParam);
        }
        let timebase = Timebase::for_frequency(hal.timer_clock(), config.frequency)?;
        if critical_section(|cs| self.devices.get(cs).is_full()) {
            return Err(OsalError::ResourceExhausted);
        }

        hal.set_timebase(timebase)?;
        hal.set_compare(config.channel, timebase.pulse(config.duty_x10));

        let device = PwmDevice {
            hal,
            config,
            timebase,
        };
        let key = critical_section(|cs| self.devices.get(cs).insert(device))
            .map_err(|_| OsalError::ResourceExhausted)?;

        crate::debug!("pwm {} ch{} registered", hal.id(), config.channel);
        Ok(PwmHandle(key))
    }

    /// Stop the output and free the slot
    pub fn deregister(&self, handle: PwmHandle) -> OsalResult {
        let device = critical_section(|cs| self.devices.get(cs).remove(handle.0))
            .ok_or(OsalError::InvalidParam)?;
        let _ = device.hal.stop(device.config.channel, device.config.mode);
        Ok(())
    }

    fn lookup(&self, handle: PwmHandle) -> OsalResult<PwmDevice<H>> {
        critical_section(|cs| self.devices.get(cs).get(handle.0).copied())
            .ok_or(OsalError::InvalidParam)
    }

    fn store(&self, handle: PwmHandle, config: PwmConfig, timebase: Timebase) -> OsalResult {
        critical_section(|cs| {
            let device = self
                .devices
                .get(cs)
                .get_mut(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            device.config = config;
            device.timebase = timebase;
            Ok(())
        })
    }

    pub fn start(&self, handle: PwmHandle) -> OsalResult {
        let device = self.lookup(handle)?;
        device.hal.start(device.config.channel, device.config.mode)?;
        Ok(())
    }

    pub fn stop(&self, handle: PwmHandle) -> OsalResult {
        let device = self.lookup(handle)?;
        device.hal.stop(device.config.channel, device.config.mode)?;
        Ok(())
    }

    pub fn set_duty(&self, handle: PwmHandle, duty_x10: u16) -> OsalResult {
        if duty_x10 > DUTY_MAX {
            return Err(OsalError::InvalidParam);
        }
        let device = self.lookup(handle)?;
        let config = PwmConfig {
            duty_x10,
            ..device.config
        };

        device
            .hal
            .set_compare(config.channel, device.timebase.pulse(duty_x10));
        self.store(handle, config, device.timebase)
    }

    /// Retune the timer, keeping the duty
    pub fn set_frequency(&self, handle: PwmHandle, frequency: u32) -> OsalResult {
        let device = self.lookup(handle)?;
        let timebase = Timebase::for_frequency(device.hal.timer_clock(), frequency)?;
        let config = PwmConfig {
            frequency,
            ..device.config
        };

        device.hal.set_timebase(timebase)?;
        device
            .hal
            .set_compare(config.channel, timebase.pulse(config.duty_x10));
        self.store(handle, config, timebase)
    }

    pub fn config(&self, handle: PwmHandle) -> OsalResult<PwmConfig> {
        Ok(self.lookup(handle)?.config)
    }

    pub fn timebase(&self, handle: PwmHandle) -> OsalResult<Timebase> {
        Ok(self.lookup(handle)?.timebase)
    }

    pub fn len(&self) -> usize {
        critical_section(|cs| self.devices.get(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: PwmHal, const N: usize> Default for PwmRegistry<H, N> {
    fn default() -> Self {
        Self::new()
    }
}
