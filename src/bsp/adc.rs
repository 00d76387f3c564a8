//! ADC devices
//!
//! One conversion per configured channel forms a frame. Interrupt and Dma
//! devices convert continuously into a double buffer; Blocking devices poll
//! every channel on [`AdcRegistry::get_values`].

use crate::config::{CFG_ADC_MAX_CHANNELS, CFG_ADC_MAX_DEVICES};
use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::osal::{
    remaining, EventFlags, Osal, OsalError, OsalEvent, OsalMutex, OsalResult, Tick, WaitMode,
};

use super::arena::{Arena, Key};
use super::double_buffer::{DoubleBuffer, RxSlot};
use super::{HalError, PeripheralId, TransferMode};

pub const ADC_DONE: EventFlags = 1 << 0;
pub const ADC_ERROR: EventFlags = 1 << 1;

/// Full-scale code of a 12-bit conversion
pub const ADC_FULL_SCALE: u16 = 4095;
/// Nominal internal reference voltage
pub const VREFINT_NOMINAL: f32 = 1.2;
/// Nominal analog supply voltage
pub const SUPPLY_NOMINAL: f32 = 3.3;

/// Peripheral glue for one ADC
pub trait AdcHal: Sync + 'static {
    fn id(&self) -> PeripheralId;

    /// Start continuous conversion; Dma mode writes one frame into `slot`
    fn start(&self, slot: RxSlot<u16>, mode: TransferMode) -> Result<(), HalError>;

    fn stop(&self, mode: TransferMode) -> Result<(), HalError>;

    /// Convert channel `index` and return the raw code
    fn poll(&self, index: usize, timeout: Tick) -> Result<u16, HalError>;

    /// Read the finished conversions of an Interrupt mode frame
    fn collect(&self, out: &mut [u16]) -> Result<(), HalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcConfig {
    pub channels: usize,
    pub mode: TransferMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcHandle(Key);

struct AdcDevice<H: 'static> {
    hal: &'static H,
    config: AdcConfig,
    running: bool,
}

pub struct AdcRegistry<
    B: Osal,
    H: AdcHal,
    const N: usize = CFG_ADC_MAX_DEVICES,
    const CH: usize = CFG_ADC_MAX_CHANNELS,
> {
    devices: CsCell<Arena<AdcDevice<H>, N>>,
    buffers: [DoubleBuffer<u16, CH>; N],
    events: [B::Event; N],
    locks: [B::Mutex; N],
}

impl<B: Osal, H: AdcHal, const N: usize, const CH: usize> AdcRegistry<B, H, N, CH> {
    pub const fn new() -> Self {
        AdcRegistry {
            devices: CsCell::new(Arena::new()),
            buffers: [const { DoubleBuffer::new(0) }; N],
            events: [const { <B::Event as OsalEvent>::INIT }; N],
            locks: [const { <B::Mutex as OsalMutex>::INIT }; N],
        }
    }

    /// # Returns
    /// * `Err(OsalError::InvalidParam)` - Channel count outside `1..=CH`, or
    ///   the peripheral is already registered
    /// * `Err(OsalError::ResourceExhausted)` - All `N` devices in use
    pub fn register(&self, hal: &'static H, config: AdcConfig) -> OsalResult<AdcHandle> {
        if config.channels == 0 || config.channels > CH {
            return Err(OsalError::InvalidParam);
        }

        critical_section(|cs| {
            let devices = self.devices.get(cs);
            let id = hal.id();
            if devices.find(|d| d.hal.id() == id).is_some() {
                crate::warn!("adc {} already registered", id);
                return Err(OsalError::InvalidParam);
            }

            let key = devices
                .insert(AdcDevice {
                    hal,
                    config,
                    running: false,
                })
                .map_err(|_| OsalError::ResourceExhausted)?;
            let index = key.index();

            if let Err(e) = self.events[index].create("adc") {
                devices.remove(key);
                return Err(e);
            }
            if let Err(e) = self.locks[index].create("adc") {
                let _ = self.events[index].delete();
                devices.remove(key);
                return Err(e);
            }
            self.buffers[index].reset();

            crate::debug!("adc {} registered, {} channels", id, config.channels);
            Ok(AdcHandle(key))
        })
    }

    /// Stop conversions and free the device
    pub fn deregister(&self, handle: AdcHandle) -> OsalResult {
        let device = critical_section(|cs| {
            let device = self
                .devices
                .get(cs)
                .remove(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            let index = handle.0.index();
            let _ = self.events[index].delete();
            let _ = self.locks[index].delete();
            Ok::<_, OsalError>(device)
        })?;

        if device.running {
            let _ = device.hal.stop(device.config.mode);
        }
        Ok(())
    }

    fn lookup(&self, handle: AdcHandle) -> OsalResult<(usize, &'static H, AdcConfig, bool)> {
        critical_section(|cs| {
            let device = self
                .devices
                .get(cs)
                .get(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            Ok((handle.0.index(), device.hal, device.config, device.running))
        })
    }

    fn set_running(&self, handle: AdcHandle, running: bool) {
        critical_section(|cs| {
            if let Some(device) = self.devices.get(cs).get_mut(handle.0) {
                device.running = running;
            }
        })
    }

    /// Start conversions; Blocking devices convert on demand instead
    pub fn start(&self, handle: AdcHandle) -> OsalResult {
        let (index, hal, config, _) = self.lookup(handle)?;
        if config.mode.is_async() {
            let slot = self.buffers[index].producer_slot(config.channels);
            hal.start(slot, config.mode)?;
        }
        self.set_running(handle, true);
        Ok(())
    }

    pub fn stop(&self, handle: AdcHandle) -> OsalResult {
        let (_, hal, config, _) = self.lookup(handle)?;
        if config.mode.is_async() {
            hal.stop(config.mode)?;
        }
        self.set_running(handle, false);
        Ok(())
    }

    /// Acquire a fresh frame
    ///
    /// Blocking devices poll every channel; Interrupt and Dma devices wait
    /// for the next completed frame. Returns the channel count. `timeout`
    /// covers the wait for the device and the acquisition together.
    pub fn get_values(&self, handle: AdcHandle, timeout: Tick) -> OsalResult<usize> {
        let (index, hal, config, _) = self.lookup(handle)?;
        let lock = &self.locks[index];
        let start = B::tick_count();
        lock.lock(timeout)?;

        let result = remaining(timeout, B::tick_count().wrapping_sub(start))
            .and_then(|left| self.acquire(index, hal, config, left));
        let unlocked = lock.unlock();
        let channels = result?;
        unlocked?;
        Ok(channels)
    }

    fn acquire(&self, index: usize, hal: &'static H, config: AdcConfig, timeout: Tick) -> OsalResult<usize> {
        let buffer = &self.buffers[index];

        if !config.mode.is_async() {
            let slot = buffer.dedicated(config.channels);
            // SAFETY: Blocking devices have no producer besides this call,
            // which the device lock serializes.
            let frame = unsafe { slot.as_mut_slice() };
            for (channel, value) in frame.iter_mut().enumerate() {
                *value = hal.poll(channel, timeout)?;
            }
            buffer.commit_dedicated(config.channels);
            return Ok(config.channels);
        }

        let flags = self.events[index].wait(ADC_DONE | ADC_ERROR, WaitMode::Any, true, timeout)?;
        if flags & ADC_DONE == 0 {
            return Err(OsalError::Error);
        }
        Ok(config.channels)
    }

    /// Raw code of channel `index` from the last completed frame
    pub fn channel_value(&self, handle: AdcHandle, index: usize) -> OsalResult<u16> {
        let (slot, _, config, _) = self.lookup(handle)?;
        if index >= config.channels {
            return Err(OsalError::InvalidParam);
        }
        self.buffers[slot].read_at(index)
    }

    /// Copy the last completed frame into `out`
    pub fn values(&self, handle: AdcHandle, out: &mut [u16]) -> OsalResult<usize> {
        let (index, _, _, _) = self.lookup(handle)?;
        self.buffers[index].read(out)
    }

    pub fn config(&self, handle: AdcHandle) -> OsalResult<AdcConfig> {
        Ok(self.lookup(handle)?.2)
    }

    // ============ ISR entry points ============

    /// A frame finished converting
    pub fn on_conversion_complete(&self, handle: AdcHandle) {
        let Ok((index, hal, config, running)) = self.lookup(handle) else {
            return;
        };
        if !config.mode.is_async() || !running {
            return;
        }
        let buffer = &self.buffers[index];

        if config.mode == TransferMode::Interrupt {
            let slot = buffer.producer_slot(config.channels);
            // SAFETY: the ISR is the producer of the active slot.
            if hal.collect(unsafe { slot.as_mut_slice() }).is_err() {
                let _ = self.events[index].set(ADC_ERROR);
                return;
            }
        }

        let next = buffer.complete(config.channels, config.channels);
        let mut flags = ADC_DONE;
        if config.mode == TransferMode::Dma && hal.start(next, config.mode).is_err() {
            flags |= ADC_ERROR;
        }
        let _ = self.events[index].set(flags);
    }

    /// Conversion error: restart into the same slot and report
    pub fn on_error(&self, handle: AdcHandle) {
        let Ok((index, hal, config, running)) = self.lookup(handle) else {
            return;
        };
        crate::warn!("adc {}: error", hal.id());

        if config.mode.is_async() && running {
            let _ = hal.stop(config.mode);
            let slot = self.buffers[index].producer_slot(config.channels);
            let _ = hal.start(slot, config.mode);
        }
        let _ = self.events[index].set(ADC_ERROR);
    }
}

impl<B: Osal, H: AdcHal, const N: usize, const CH: usize> Default for AdcRegistry<B, H, N, CH> {
    fn default() -> Self {
        Self::new()
    }
}

/// Supply reference derived from the internal reference channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceVoltage {
    volts_per_lsb: f32,
}

impl ReferenceVoltage {
    /// Uncalibrated: nominal supply over full scale
    pub const NOMINAL: Self = ReferenceVoltage {
        volts_per_lsb: SUPPLY_NOMINAL / ADC_FULL_SCALE as f32,
    };

    /// Calibrate from raw conversions of the internal reference
    pub fn from_vrefint(samples: &[u16]) -> OsalResult<Self> {
        if samples.is_empty() {
            return Err(OsalError::InvalidParam);
        }
        let total: u32 = samples.iter().map(|&s| s as u32).sum();
        if total == 0 {
            return Err(OsalError::Error);
        }
        let average = total as f32 / samples.len() as f32;
        Ok(ReferenceVoltage {
            volts_per_lsb: VREFINT_NOMINAL / average,
        })
    }

    /// Calibrated analog supply voltage
    pub fn supply(&self) -> f32 {
        self.volts_per_lsb * ADC_FULL_SCALE as f32
    }

    pub fn to_volts(&self, raw: u16) -> f32 {
        raw as f32 * self.volts_per_lsb
    }
}

impl Default for ReferenceVoltage {
    fn default() -> Self {
        Self::NOMINAL
    }
}
