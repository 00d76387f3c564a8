//! I²C devices
//!
//! 7- and 10-bit addresses. Register access goes through the `mem_*`
//! operations with an 8- or 16-bit register address.

use crate::config::{CFG_I2C_BUS_NUM, CFG_I2C_DEVICES_PER_BUS};
use crate::osal::{Osal, OsalError, OsalResult, Tick, WAIT_FOREVER};

use super::bus::{
    BusHal, BusOp, BusRegistry, BusToken, DeviceConfig, DeviceHandle, MemAddrSize, BUS_ERROR,
    RX_DONE, TX_DONE,
};
use super::TransferMode;

/// Highest 10-bit address
pub const I2C_ADDR_MAX: u16 = 0x3FF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cDeviceConfig {
    pub addr: u16,
    pub tx_mode: TransferMode,
    pub rx_mode: TransferMode,
}

pub struct I2cBus<
    B: Osal,
    H: BusHal,
    const BUSES: usize = CFG_I2C_BUS_NUM,
    const DEVICES: usize = CFG_I2C_DEVICES_PER_BUS,
> {
    buses: BusRegistry<B, H, BUSES, DEVICES>,
}

impl<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> I2cBus<B, H, BUSES, DEVICES> {
    pub const fn new() -> Self {
        I2cBus {
            buses: BusRegistry::new(),
        }
    }

    /// # Returns
    /// * `Err(OsalError::InvalidParam)` - Address above [`I2C_ADDR_MAX`]
    pub fn register(&self, hal: &'static H, config: I2cDeviceConfig) -> OsalResult<DeviceHandle> {
        if config.addr > I2C_ADDR_MAX {
            return Err(OsalError::InvalidParam);
        }
        self.buses.register(
            hal,
            DeviceConfig {
                addr: config.addr,
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

    /// Write `data` to register `mem_addr`
    pub fn mem_write(
        &self,
        handle: DeviceHandle,
        mem_addr: u16,
        size: MemAddrSize,
        data: &[u8],
    ) -> OsalResult {
        self.mem_write_timeout(handle, mem_addr, size, data, WAIT_FOREVER)
    }

    pub fn mem_write_timeout(
        &self,
        handle: DeviceHandle,
        mem_addr: u16,
        size: MemAddrSize,
        data: &[u8],
        timeout: Tick,
    ) -> OsalResult {
        if !size.fits(mem_addr) {
            return Err(OsalError::InvalidParam);
        }
        let op = BusOp::MemWrite {
            mem_addr,
            size,
            data,
        };
        self.buses.transfer(handle, op, timeout)
    }

    /// Read register `mem_addr` into `buf`
    pub fn mem_read(
        &self,
        handle: DeviceHandle,
        mem_addr: u16,
        size: MemAddrSize,
        buf: &mut [u8],
    ) -> OsalResult {
        self.mem_read_timeout(handle, mem_addr, size, buf, WAIT_FOREVER)
    }

    pub fn mem_read_timeout(
        &self,
        handle: DeviceHandle,
        mem_addr: u16,
        size: MemAddrSize,
        buf: &mut [u8],
        timeout: Tick,
    ) -> OsalResult {
        if !size.fits(mem_addr) {
            return Err(OsalError::InvalidParam);
        }
        let op = BusOp::MemRead {
            mem_addr,
            size,
            data: buf,
        };
        self.buses.transfer(handle, op, timeout)
    }

    /// Register write or read through one buffer
    pub fn mem_write_read(
        &self,
        handle: DeviceHandle,
        mem_addr: u16,
        size: MemAddrSize,
        buf: &mut [u8],
        is_write: bool,
    ) -> OsalResult {
        if is_write {
            self.mem_write(handle, mem_addr, size, buf)
        } else {
            self.mem_read(handle, mem_addr, size, buf)
        }
    }

    pub fn config(&self, handle: DeviceHandle) -> OsalResult<I2cDeviceConfig> {
        let config = self.buses.config(handle)?;
        Ok(I2cDeviceConfig {
            addr: config.addr,
            tx_mode: config.tx_mode,
            rx_mode: config.rx_mode,
        })
    }

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

    pub fn on_error(&self, token: BusToken) {
        self.buses.complete(token, BUS_ERROR);
    }
}

impl<B: Osal, H: BusHal, const BUSES: usize, const DEVICES: usize> Default
    for I2cBus<B, H, BUSES, DEVICES>
{
    fn default() -> Self {
        Self::new()
    }
}
