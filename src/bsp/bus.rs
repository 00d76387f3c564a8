//! Generic bus manager
//!
//! One bus manager per physical bus holds a mutex and a completion event
//! shared by every device registered on it. The first registration on a bus
//! opens the manager, the last deregistration closes it and frees the slot
//! for another bus.
//!
//! A transfer runs as lock → select → start → (wait) → deselect → unlock, so
//! sequences on one bus never interleave. Interrupt and DMA transfers wait
//! for the operation's done bit or [`BUS_ERROR`], set from the glue's ISR
//! through [`BusRegistry::complete`] and [`BusRegistry::fail`].

use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::osal::{
    remaining, EventFlags, Osal, OsalError, OsalEvent, OsalMutex, OsalResult, Tick, WaitMode,
    WAIT_FOREVER,
};

use super::arena::{Arena, Key};
use super::{HalError, PeripheralId, TransferMode};

pub const TX_DONE: EventFlags = 1 << 0;
pub const RX_DONE: EventFlags = 1 << 1;
pub const TX_RX_DONE: EventFlags = 1 << 2;
pub const BUS_ERROR: EventFlags = 1 << 3;

/// Width of a register address on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemAddrSize {
    Bits8,
    Bits16,
}

impl MemAddrSize {
    #[inline]
    pub fn fits(self, mem_addr: u16) -> bool {
        match self {
            MemAddrSize::Bits8 => mem_addr <= 0xFF,
            MemAddrSize::Bits16 => true,
        }
    }
}

/// One bus operation
///
/// In Interrupt and Dma mode the buffers stay borrowed by the glue until the
/// transfer completes, fails, or is aborted after a timeout.
#[derive(Debug)]
pub enum BusOp<'a> {
    Write(&'a [u8]),
    Read(&'a mut [u8]),
    /// Full duplex, equal lengths
    WriteRead { tx: &'a [u8], rx: &'a mut [u8] },
    MemWrite {
        mem_addr: u16,
        size: MemAddrSize,
        data: &'a [u8],
    },
    MemRead {
        mem_addr: u16,
        size: MemAddrSize,
        data: &'a mut [u8],
    },
}

impl BusOp<'_> {
    /// Event bit the glue sets when this operation completes
    pub fn done_bit(&self) -> EventFlags {
        match self {
            BusOp::Write(_) | BusOp::MemWrite { .. } => TX_DONE,
            BusOp::Read(_) | BusOp::MemRead { .. } => RX_DONE,
            BusOp::WriteRead { .. } => TX_RX_DONE,
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, BusOp::Read(_) | BusOp::MemRead { .. })
    }

    fn is_empty(&self) -> bool {
        match self {
            BusOp::Write(data) | BusOp::MemWrite { data, .. } => data.is_empty(),
            BusOp::Read(data) | BusOp::MemRead { data, .. } => data.is_empty(),
            BusOp::WriteRead { tx, rx } => tx.is_empty() || rx.is_empty(),
        }
    }
}

/// Peripheral glue for one physical bus
pub trait BusHal: Sync + 'static {
    fn id(&self) -> PeripheralId;

    /// Assert the device's chip select; a no-op on addressed buses
    fn select(&self, addr: u16);

    fn deselect(&self, addr: u16);

    /// Issue `op` to device `addr`
    ///
    /// Blocking mode returns when the transfer is done. Interrupt and Dma
    /// mode only start it; completion is reported through the registry.
    fn start(&self, addr: u16, op: BusOp<'_>, mode: TransferMode) -> Result<(), HalError>;

    /// Cancel the transfer in flight
    fn abort(&self);
}

/// Logical device on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Bus address or chip-select index
    pub addr: u16,
    pub tx_mode: TransferMode,
    pub rx_mode: TransferMode,
}

/// Identifies a bus manager to the glue's interrupt handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusToken(Key);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle {
    bus: Key,
    device: Key,
}

impl DeviceHandle {
    #[inline]
    pub fn token(self) -> BusToken {
        BusToken(self.bus)
    }
}

struct BusState<H: 'static, const DEVICES: usize> {
    hal: &'static H,
    devices: Arena<DeviceConfig, DEVICES>,
    /// Device slots in registration order
    order: heapless::Vec<u8, DEVICES>,
    active: Option<Key>,
}

impl<H: BusHal, const DEVICES: usize> BusState<H, DEVICES> {
    fn new(hal: &'static H) -> Self {
        BusState {
            hal,
            devices: Arena::new(),
            order: heapless::Vec::new(),
            active: None,
        }
    }
}

/// Bus managers for up to `BUSES` buses of `DEVICES` devices each
pub struct BusRegistry<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> {
    buses: CsCell<Arena<BusState<H, DEVICES>, BUSES>>,
    locks: [B::Mutex; BUSES],
    events: [B::Event; BUSES],
}

impl<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> BusRegistry<B, H, BUSES, DEVICES> {
    pub const fn new() -> Self {
        BusRegistry {
            buses: CsCell::new(Arena::new()),
            locks: [const { <B::Mutex as OsalMutex>::INIT }; BUSES],
            events: [const { <B::Event as OsalEvent>::INIT }; BUSES],
        }
    }

    /// Register a device, opening the bus manager on first use
    ///
    /// # Returns
    /// * `Err(OsalError::ResourceExhausted)` - No free bus manager, or the
    ///   bus already carries `DEVICES` devices
    pub fn register(&self, hal: &'static H, config: DeviceConfig) -> OsalResult<DeviceHandle> {
        critical_section(|cs| {
            let buses = self.buses.get(cs);
            let id = hal.id();

            let bus = match buses.find(|b| b.hal.id() == id) {
                Some(bus) => bus,
                None => self.open(buses, hal)?,
            };
            let state = buses.get_mut(bus).ok_or(OsalError::Error)?;

            let device = state.devices.insert(config).map_err(|_| {
                crate::warn!("bus {}: device table full", id);
                OsalError::ResourceExhausted
            })?;
            state
                .order
                .push(device.index() as u8)
                .map_err(|_| OsalError::Error)?;

            crate::debug!("bus {}: device {:#x} registered", id, config.addr);
            Ok(DeviceHandle { bus, device })
        })
    }

    fn open(
        &self,
        buses: &mut Arena<BusState<H, DEVICES>, BUSES>,
        hal: &'static H,
    ) -> OsalResult<Key> {
        let key = buses.insert(BusState::new(hal)).map_err(|_| {
            crate::warn!("no free bus manager");
            OsalError::ResourceExhausted
        })?;

        let index = key.index();
        if let Err(e) = self.locks[index].create("bus") {
            buses.remove(key);
            return Err(e);
        }
        if let Err(e) = self.events[index].create("bus") {
            let _ = self.locks[index].delete();
            buses.remove(key);
            return Err(e);
        }

        crate::info!("bus {} opened", hal.id());
        Ok(key)
    }

    /// Remove a device; the last one closes the bus manager
    ///
    /// Waits for the bus mutex, so a transfer in flight finishes first.
    /// A stale or unknown handle is `InvalidParam` and changes nothing.
    pub fn deregister(&self, handle: DeviceHandle) -> OsalResult {
        let index = self.lookup(handle)?.0;
        self.lock_bus(handle, index, WAIT_FOREVER)?;

        let closed = critical_section(|cs| {
            let buses = self.buses.get(cs);
            let bus = buses.get_mut(handle.bus).ok_or(OsalError::InvalidParam)?;
            bus.devices
                .remove(handle.device)
                .ok_or(OsalError::InvalidParam)?;
            bus.order.retain(|&i| i as usize != handle.device.index());
            if bus.active == Some(handle.device) {
                bus.active = None;
            }
            crate::debug!("bus {}: device deregistered", bus.hal.id());

            if !bus.devices.is_empty() {
                return Ok(false);
            }

            let _id = bus.hal.id();
            buses.remove(handle.bus);
            let _ = self.locks[index].delete();
            let _ = self.events[index].delete();
            crate::info!("bus {} closed", _id);
            Ok(true)
        });

        match closed {
            Ok(true) => Ok(()),
            Ok(false) => self.locks[index].unlock(),
            Err(e) => {
                self.locks[index].unlock()?;
                Err(e)
            }
        }
    }

    fn lookup(&self, handle: DeviceHandle) -> OsalResult<(usize, &'static H, DeviceConfig)> {
        critical_section(|cs| {
            let bus = self
                .buses
                .get(cs)
                .get(handle.bus)
                .ok_or(OsalError::InvalidParam)?;
            let config = bus
                .devices
                .get(handle.device)
                .ok_or(OsalError::InvalidParam)?;
            Ok((handle.bus.index(), bus.hal, *config))
        })
    }

    fn set_active(&self, bus: Key, device: Option<Key>) {
        critical_section(|cs| {
            if let Some(state) = self.buses.get(cs).get_mut(bus) {
                state.active = device;
            }
        })
    }

    /// Take the bus mutex for `handle`
    ///
    /// A bus closed while we waited deletes its mutex under us; that is the
    /// same stale handle as one looked up afterwards.
    fn lock_bus(&self, handle: DeviceHandle, index: usize, timeout: Tick) -> OsalResult {
        match self.locks[index].lock(timeout) {
            Err(OsalError::Error) if self.lookup(handle).is_err() => Err(OsalError::InvalidParam),
            other => other,
        }
    }

    /// Run `f` with the bus locked and the device selected
    ///
    /// `f` gets what is left of `timeout` after waiting for the bus.
    fn with_device<R>(
        &self,
        handle: DeviceHandle,
        timeout: Tick,
        f: impl FnOnce(usize, &'static H, DeviceConfig, Tick) -> OsalResult<R>,
    ) -> OsalResult<R> {
        let index = self.lookup(handle)?.0;
        let start = B::tick_count();
        self.lock_bus(handle, index, timeout)?;

        // The device may have left while we waited for the bus.
        let ready = self.lookup(handle).and_then(|(_, hal, config)| {
            let left = remaining(timeout, B::tick_count().wrapping_sub(start))?;
            Ok((hal, config, left))
        });
        let result = match ready {
            Ok((hal, config, left)) => {
                self.set_active(handle.bus, Some(handle.device));
                hal.select(config.addr);
                let result = f(index, hal, config, left);
                hal.deselect(config.addr);
                self.set_active(handle.bus, None);
                result
            }
            Err(e) => Err(e),
        };

        let unlocked = self.locks[index].unlock();
        let value = result?;
        unlocked?;
        Ok(value)
    }

    /// Start `op` and, in Interrupt/Dma mode, wait for its completion
    fn issue(
        &self,
        index: usize,
        hal: &'static H,
        addr: u16,
        op: BusOp<'_>,
        mode: TransferMode,
        timeout: Tick,
    ) -> OsalResult {
        let bits = op.done_bit() | BUS_ERROR;
        let event = &self.events[index];

        if mode.is_async() {
            event.clear(bits)?;
        }
        hal.start(addr, op, mode)?;
        if !mode.is_async() {
            return Ok(());
        }

        match event.wait(bits, WaitMode::Any, true, timeout) {
            Ok(flags) if flags & BUS_ERROR != 0 => {
                crate::warn!("bus {}: transfer error", hal.id());
                Err(OsalError::Error)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                hal.abort();
                Err(e)
            }
        }
    }

    /// Run one operation on the device
    ///
    /// Reads use the device's receive mode, everything else its transmit mode.
    pub fn transfer(&self, handle: DeviceHandle, op: BusOp<'_>, timeout: Tick) -> OsalResult {
        if op.is_empty() {
            return Err(OsalError::InvalidParam);
        }
        self.with_device(handle, timeout, |index, hal, config, left| {
            let mode = if op.is_read() {
                config.rx_mode
            } else {
                config.tx_mode
            };
            self.issue(index, hal, config.addr, op, mode, left)
        })
    }

    /// Two blocking writes under one bus hold and one select
    ///
    /// The second write is skipped when the first fails.
    pub fn transmit_then_transmit(
        &self,
        handle: DeviceHandle,
        first: &[u8],
        second: &[u8],
        timeout: Tick,
    ) -> OsalResult {
        if first.is_empty() || second.is_empty() {
            return Err(OsalError::InvalidParam);
        }
        self.with_device(handle, timeout, |index, hal, config, left| {
            let blocking = TransferMode::Blocking;
            self.issue(index, hal, config.addr, BusOp::Write(first), blocking, left)?;
            self.issue(index, hal, config.addr, BusOp::Write(second), blocking, left)
        })
    }

    /// ISR entry: an Interrupt/Dma transfer finished
    ///
    /// Stale tokens are ignored.
    pub fn complete(&self, token: BusToken, flags: EventFlags) {
        let live = critical_section(|cs| self.buses.get(cs).contains(token.0));
        if live {
            let _ = self.events[token.0.index()].set(flags);
        }
    }

    /// ISR entry: the transfer in flight failed
    pub fn fail(&self, token: BusToken) {
        self.complete(token, BUS_ERROR);
    }

    pub fn config(&self, handle: DeviceHandle) -> OsalResult<DeviceConfig> {
        Ok(self.lookup(handle)?.2)
    }

    /// Devices on the bus of `token`, in registration order
    pub fn devices(&self, token: BusToken) -> heapless::Vec<DeviceHandle, DEVICES> {
        critical_section(|cs| {
            let mut out = heapless::Vec::new();
            if let Some(bus) = self.buses.get(cs).get(token.0) {
                for &i in bus.order.iter() {
                    if let Some(device) = bus.devices.key_of(i as usize) {
                        let _ = out.push(DeviceHandle { bus: token.0, device });
                    }
                }
            }
            out
        })
    }

    /// Device holding the bus right now
    pub fn active_device(&self, token: BusToken) -> Option<DeviceHandle> {
        critical_section(|cs| {
            let bus = self.buses.get(cs).get(token.0)?;
            bus.active.map(|device| DeviceHandle {
                bus: token.0,
                device,
            })
        })
    }

    /// Number of open bus managers
    pub fn bus_count(&self) -> usize {
        critical_section(|cs| self.buses.get(cs).len())
    }

    pub fn is_registered(&self, handle: DeviceHandle) -> bool {
        self.lookup(handle).is_ok()
    }
}

impl<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> Default
    for BusRegistry<B, H, BUSES, DEVICES>
{
    fn default() -> Self {
        Self::new()
    }
}
