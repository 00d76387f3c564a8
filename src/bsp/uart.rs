//! UART instances with continuous double-buffered reception
//!
//! Interrupt and Dma receivers are armed at registration and re-armed by
//! the ISR entry points after every completion or error, so reception never
//! stops while the instance is registered. Blocking receivers read on demand
//! into a dedicated slot.

use crate::config::{CFG_UART_MAX_INSTANCES, CFG_UART_RX_BUF_SIZE};
use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::osal::{
    remaining, EventFlags, Osal, OsalError, OsalEvent, OsalMutex, OsalResult, Tick, WaitMode,
    WAIT_FOREVER,
};

use super::arena::{Arena, Key};
use super::double_buffer::{DoubleBuffer, RxSlot};
use super::{HalError, PeripheralId, TransferMode};

pub const UART_RX_DONE: EventFlags = 1 << 0;
pub const UART_TX_DONE: EventFlags = 1 << 1;
/// Line or DMA error on the receive side
pub const UART_RX_ERROR: EventFlags = 1 << 2;
/// Transmission failed in the peripheral
pub const UART_TX_ERROR: EventFlags = 1 << 3;

/// Peripheral glue for one UART
pub trait UartHal: Sync + 'static {
    fn id(&self) -> PeripheralId;

    /// Send `data`; Interrupt and Dma mode only start the transmission
    fn transmit(&self, data: &[u8], mode: TransferMode) -> Result<(), HalError>;

    /// Blocking receive of up to `buf.len()` bytes
    fn receive(&self, buf: &mut [u8], timeout: Tick) -> Result<usize, HalError>;

    /// Start a receive-to-idle into `slot`
    fn start_receive(&self, slot: RxSlot<u8>, mode: TransferMode) -> Result<(), HalError>;

    /// Bytes the DMA stream has not written yet
    fn dma_remaining(&self) -> usize;

    fn abort_receive(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    pub tx_mode: TransferMode,
    pub rx_mode: TransferMode,
    /// Slot length used for reception, at most the slot capacity
    pub rx_len: usize,
    /// Fixed frame length, 0 when frames end on line idle
    pub expected_len: usize,
}

impl UartConfig {
    /// Bytes requested per reception
    fn request_len(&self) -> usize {
        if self.expected_len > 0 {
            self.expected_len
        } else {
            self.rx_len
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartHandle(Key);

struct UartInstance<H: 'static> {
    hal: &'static H,
    config: UartConfig,
}

pub struct UartRegistry<
    B: Osal,
    H: UartHal,
    const N: usize = CFG_UART_MAX_INSTANCES,
    const CAP: usize = CFG_UART_RX_BUF_SIZE,
> {
    instances: CsCell<Arena<UartInstance<H>, N>>,
    buffers: [DoubleBuffer<u8, CAP>; N],
    events: [B::Event; N],
    tx_locks: [B::Mutex; N],
}

impl<B: Osal, H: UartHal, const N: usize, const CAP: usize> UartRegistry<B, H, N, CAP> {
    pub const fn new() -> Self {
        UartRegistry {
            instances: CsCell::new(Arena::new()),
            buffers: [const { DoubleBuffer::new(0) }; N],
            events: [const { <B::Event as OsalEvent>::INIT }; N],
            tx_locks: [const { <B::Mutex as OsalMutex>::INIT }; N],
        }
    }

    /// Register a UART and start continuous reception
    ///
    /// # Returns
    /// * `Err(OsalError::InvalidParam)` - `rx_len` outside `1..=CAP`, or the
    ///   peripheral is already registered
    /// * `Err(OsalError::ResourceExhausted)` - All `N` instances in use
    pub fn register(&self, hal: &'static H, mut config: UartConfig) -> OsalResult<UartHandle> {
        if config.rx_len == 0 || config.rx_len > CAP {
            return Err(OsalError::InvalidParam);
        }
        config.expected_len = config.expected_len.min(config.rx_len);

        let handle = critical_section(|cs| {
            let instances = self.instances.get(cs);
            let id = hal.id();
            if instances.find(|u| u.hal.id() == id).is_some() {
                crate::warn!("uart {} already registered", id);
                return Err(OsalError::InvalidParam);
            }

            let key = instances
                .insert(UartInstance { hal, config })
                .map_err(|_| OsalError::ResourceExhausted)?;
            let index = key.index();

            if let Err(e) = self.events[index].create("uart") {
                instances.remove(key);
                return Err(e);
            }
            if let Err(e) = self.tx_locks[index].create("uart_tx") {
                let _ = self.events[index].delete();
                instances.remove(key);
                return Err(e);
            }
            self.buffers[index].reset();
            Ok::<_, OsalError>(UartHandle(key))
        })?;

        if config.rx_mode.is_async() {
            let slot = self.buffers[handle.0.index()].producer_slot(config.request_len());
            if let Err(e) = hal.start_receive(slot, config.rx_mode) {
                let _ = self.deregister(handle);
                return Err(e.into());
            }
        }

        crate::debug!("uart {} registered", hal.id());
        Ok(handle)
    }

    /// Stop reception and free the instance
    pub fn deregister(&self, handle: UartHandle) -> OsalResult {
        let instance = critical_section(|cs| {
            let instance = self
                .instances
                .get(cs)
                .remove(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            let index = handle.0.index();
            let _ = self.events[index].delete();
            let _ = self.tx_locks[index].delete();
            Ok::<_, OsalError>(instance)
        })?;

        if instance.config.rx_mode.is_async() {
            instance.hal.abort_receive();
        }
        crate::debug!("uart {} deregistered", instance.hal.id());
        Ok(())
    }

    fn lookup(&self, handle: UartHandle) -> OsalResult<(usize, &'static H, UartConfig)> {
        critical_section(|cs| {
            let instance = self
                .instances
                .get(cs)
                .get(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            Ok((handle.0.index(), instance.hal, instance.config))
        })
    }

    /// Send `data`, returning the number of bytes sent
    pub fn send(&self, handle: UartHandle, data: &[u8]) -> OsalResult<usize> {
        self.send_timeout(handle, data, WAIT_FOREVER)
    }

    /// Sends on one instance are serialized; `timeout` covers the wait for
    /// the instance and the wait for completion together.
    pub fn send_timeout(&self, handle: UartHandle, data: &[u8], timeout: Tick) -> OsalResult<usize> {
        if data.is_empty() {
            return Err(OsalError::InvalidParam);
        }
        let (index, hal, config) = self.lookup(handle)?;
        let lock = &self.tx_locks[index];
        let start = B::tick_count();
        lock.lock(timeout)?;

        let result = remaining(timeout, B::tick_count().wrapping_sub(start))
            .and_then(|left| self.transmit(index, hal, config.tx_mode, data, left));
        let unlocked = lock.unlock();
        result?;
        unlocked?;
        Ok(data.len())
    }

    fn transmit(
        &self,
        index: usize,
        hal: &'static H,
        mode: TransferMode,
        data: &[u8],
        timeout: Tick,
    ) -> OsalResult {
        let event = &self.events[index];
        if mode.is_async() {
            event.clear(UART_TX_DONE | UART_TX_ERROR)?;
        }
        hal.transmit(data, mode)?;
        if !mode.is_async() {
            return Ok(());
        }

        let flags = event.wait(UART_TX_DONE | UART_TX_ERROR, WaitMode::Any, true, timeout)?;
        if flags & UART_TX_DONE == 0 {
            return Err(OsalError::Error);
        }
        Ok(())
    }

    /// Wait for the next reception and copy it into `out`
    ///
    /// Returns the number of bytes copied. A completion that arrived after
    /// an error still counts as data; an error alone is `Error`.
    pub fn read(&self, handle: UartHandle, out: &mut [u8], timeout: Tick) -> OsalResult<usize> {
        if out.is_empty() {
            return Err(OsalError::InvalidParam);
        }
        let (index, hal, config) = self.lookup(handle)?;
        let buffer = &self.buffers[index];

        if !config.rx_mode.is_async() {
            let slot = buffer.dedicated(config.request_len());
            // SAFETY: blocking receivers have no producer besides this call.
            let received = hal.receive(unsafe { slot.as_mut_slice() }, timeout)?;
            buffer.commit_dedicated(received);
            return buffer.read(out);
        }

        let flags =
            self.events[index].wait(UART_RX_DONE | UART_RX_ERROR, WaitMode::Any, true, timeout)?;
        if flags & UART_RX_DONE == 0 {
            return Err(OsalError::Error);
        }
        buffer.read(out)
    }

    /// Copy the last completed reception without waiting
    pub fn read_latest(&self, handle: UartHandle, out: &mut [u8]) -> OsalResult<usize> {
        let (index, _, _) = self.lookup(handle)?;
        self.buffers[index].read(out)
    }

    pub fn config(&self, handle: UartHandle) -> OsalResult<UartConfig> {
        Ok(self.lookup(handle)?.2)
    }

    pub fn instance_count(&self) -> usize {
        critical_section(|cs| self.instances.get(cs).len())
    }

    // ============ ISR entry points ============

    /// Reception finished with `size` bytes reported by the glue
    ///
    /// Dma receivers without a fixed frame length derive the length from
    /// the stream's remaining count instead.
    pub fn on_rx_event(&self, handle: UartHandle, size: usize) {
        let Ok((index, hal, config)) = self.lookup(handle) else {
            return;
        };
        if !config.rx_mode.is_async() {
            return;
        }

        let len = if config.rx_mode == TransferMode::Dma && config.expected_len == 0 {
            config.rx_len.saturating_sub(hal.dma_remaining())
        } else {
            size.min(config.rx_len)
        };

        let next = self.buffers[index].complete(len, config.request_len());
        let mut flags = UART_RX_DONE;
        if hal.start_receive(next, config.rx_mode).is_err() {
            crate::warn!("uart {}: re-arm failed", hal.id());
            flags |= UART_RX_ERROR;
        }
        let _ = self.events[index].set(flags);
    }

    pub fn on_tx_complete(&self, handle: UartHandle) {
        if let Ok((index, _, _)) = self.lookup(handle) {
            let _ = self.events[index].set(UART_TX_DONE);
        }
    }

    /// Transmission aborted by the peripheral; fails the pending send
    pub fn on_tx_error(&self, handle: UartHandle) {
        if let Ok((index, _hal, _)) = self.lookup(handle) {
            crate::warn!("uart {}: tx error", _hal.id());
            let _ = self.events[index].set(UART_TX_ERROR);
        }
    }

    /// Receive-side line or DMA error: abort, re-arm into the same slot,
    /// report to readers. A send in flight is not affected.
    pub fn on_error(&self, handle: UartHandle) {
        let Ok((index, hal, config)) = self.lookup(handle) else {
            return;
        };
        crate::warn!("uart {}: error", hal.id());

        if config.rx_mode.is_async() {
            hal.abort_receive();
            let slot = self.buffers[index].producer_slot(config.request_len());
            let _ = hal.start_receive(slot, config.rx_mode);
        }
        let _ = self.events[index].set(UART_RX_ERROR);
    }
}

impl<B: Osal, H: UartHal, const N: usize, const CAP: usize> Default for UartRegistry<B, H, N, CAP> {
    fn default() -> Self {
        Self::new()
    }
}
