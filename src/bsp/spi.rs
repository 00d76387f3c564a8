//! SPI devices
//!
//! Devices are addressed by chip-select index. Duplicate chip selects on one
//! bus are not detected.

use crate::config::{CFG_SPI_BUS_NUM, CFG_SPI_DEVICES_PER_BUS};
use crate::osal::{Osal, OsalError, OsalResult, Tick, WAIT_FOREVER};

use super::bus::{
    BusHal, BusOp, BusRegistry, BusToken, DeviceConfig, DeviceHandle, BUS_ERROR, RX_DONE, TX_DONE,
    TX_RX_DONE,
};
use super::TransferMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiDeviceConfig {
    pub cs: u8,
    pub tx_mode: TransferMode,
    pub rx_mode: TransferMode,
}

pub struct SpiBus<
    B: Osal,
    H: BusHal,
    const BUSES: usize = CFG_SPI_BUS_NUM,
    const DEVICES: usize = CFG_SPI_DEVICES_PER_BUS,
> {
    buses: BusRegistry<B, H, BUSES, DEVICES>,
}

impl<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> SpiBus<B, H, BUSES, DEVICES> {
    pub const fn new() -> Self {
        SpiBus {
            buses: BusRegistry::new(),
        }
    }

    pub fn register(&self, hal: &'static H, config: SpiDeviceConfig) -> OsalResult<DeviceHandle> {
        self.buses.register(
            hal,
            DeviceConfig {
                addr: config.cs as u16,
                tx_mode: config.tx_mode,
                rx_mode: config.rx_mode,
            },
        )
    }

    pub fn deregister(&self, handle: DeviceHandle) -> OsalResult {
        self.buses.deregister(handle)
    }

    pub fn transmit(&self, handle: DeviceHandle, data: &[u8]) -> OsalResult {
        self.transmit_timeout(handle, data, WAIT_FOREVER)
    }

    pub fn transmit_timeout(&self, handle: DeviceHandle, data: &[u8], timeout: Tick) -> OsalResult {
        self.buses.transfer(handle, BusOp::Write(data), timeout)
    }

    pub fn receive(&self, handle: DeviceHandle, buf: &mut [u8]) -> OsalResult {
        self.receive_timeout(handle, buf, WAIT_FOREVER)
    }

    pub fn receive_timeout(&self, handle: DeviceHandle, buf: &mut [u8], timeout: Tick) -> OsalResult {
        self.buses.transfer(handle, BusOp::Read(buf), timeout)
    }

    /// Full-duplex exchange; both buffers must be the same length
    pub fn transmit_receive(&self, handle: DeviceHandle, tx: &[u8], rx: &mut [u8]) -> OsalResult {
        self.transmit_receive_timeout(handle, tx, rx, WAIT_FOREVER)
    }

    pub fn transmit_receive_timeout(
        &self,
        handle: DeviceHandle,
        tx: &[u8],
        rx: &mut [u8],
        timeout: Tick,
    ) -> OsalResult {
        if tx.len() != rx.len() {
            return Err(OsalError::InvalidParam);
        }
        self.buses
            .transfer(handle, BusOp::WriteRead { tx, rx }, timeout)
    }

    /// Command then payload with chip select held, both blocking
    pub fn transmit_then_transmit(&self, handle: DeviceHandle, first: &[u8], second: &[u8]) -> OsalResult {
        self.buses
            .transmit_then_transmit(handle, first, second, WAIT_FOREVER)
    }

    pub fn config(&self, handle: DeviceHandle) -> OsalResult<SpiDeviceConfig> {
        let config = self.buses.config(handle)?;
        Ok(SpiDeviceConfig {
            cs: config.addr as u8,
            tx_mode: config.tx_mode,
            rx_mode: config.rx_mode,
        })
    }

    /// Shared bus manager
    pub fn registry(&self) -> &BusRegistry<B, H, BUSES, DEVICES> {
        &self.buses
    }

    // ============ ISR entry points ============

    pub fn on_tx_complete(&self, token: BusToken) {
        self.buses.complete(token, TX_DONE);
    }

    pub fn on_rx_complete(&self, token: BusToken) {
        self.buses.complete(token, RX_DONE);
    }

    pub fn on_tx_rx_complete(&self, token: BusToken) {
        self.buses.complete(token, TX_RX_DONE);
    }

    pub fn on_error(&self, token: BusToken) {
        self.buses.complete(token, BUS_ERROR);
    }
}

impl<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> Default
    for SpiBus<B, H, BUSES, DEVICES>
{
    fn default() -> Self {
        Self::new()
    }
}
