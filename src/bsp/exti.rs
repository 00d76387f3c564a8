//! GPIO external interrupt lines
//!
//! A line is registered by its single-bit pin mask and stored at its line
//! number, so the ISR dispatches without a search.

use crate::config::CFG_EXTI_MAX_DEVICES;
use crate::core::cs_cell::CsCell;
use crate::critical::critical_section;
use crate::osal::{EventFlags, Osal, OsalError, OsalEvent, OsalResult, Tick, WaitMode};

use super::arena::{Arena, Key};

pub const EXTI_EVENT: EventFlags = 1 << 0;

/// Called in interrupt context after the line's event is set
pub type ExtiCallback = fn();

#[derive(Debug, Clone, Copy)]
pub struct ExtiConfig {
    /// Single-bit pin mask
    pub pin: u16,
    pub callback: Option<ExtiCallback>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtiHandle(Key);

impl ExtiHandle {
    #[inline]
    pub fn line(self) -> usize {
        self.0.index()
    }
}

struct ExtiLine {
    callback: Option<ExtiCallback>,
    enabled: bool,
}

fn line_of(pin: u16) -> Option<usize> {
    if pin.count_ones() == 1 {
        Some(pin.trailing_zeros() as usize)
    } else {
        None
    }
}

pub struct ExtiRegistry<B: Osal, const N: usize = CFG_EXTI_MAX_DEVICES> {
    lines: CsCell<Arena<ExtiLine, N>>,
    events: [B::Event; N],
}

impl<B: Osal, const N: usize> ExtiRegistry<B, N> {
    pub const fn new() -> Self {
        ExtiRegistry {
            lines: CsCell::new(Arena::new()),
            events: [const { <B::Event as OsalEvent>::INIT }; N],
        }
    }

    /// # Returns
    /// * `Err(OsalError::InvalidParam)` - `pin` is not a single bit, or its
    ///   line is already registered
    pub fn register(&self, config: ExtiConfig) -> OsalResult<ExtiHandle> {
        let line = line_of(config.pin)
            .filter(|&line| line < N)
            .ok_or(OsalError::InvalidParam)?;

        critical_section(|cs| {
            let lines = self.lines.get(cs);
            let entry = ExtiLine {
                callback: config.callback,
                enabled: config.enabled,
            };
            let key = lines
                .insert_at(line, entry)
                .map_err(|_| OsalError::InvalidParam)?;

            if let Err(e) = self.events[line].create("exti") {
                lines.remove(key);
                return Err(e);
            }
            crate::debug!("exti line {} registered", line);
            Ok(ExtiHandle(key))
        })
    }

    pub fn deregister(&self, handle: ExtiHandle) -> OsalResult {
        critical_section(|cs| {
            self.lines
                .get(cs)
                .remove(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            let _ = self.events[handle.line()].delete();
            Ok(())
        })
    }

    fn set_enabled(&self, handle: ExtiHandle, enabled: bool) -> OsalResult {
        critical_section(|cs| {
            let line = self
                .lines
                .get(cs)
                .get_mut(handle.0)
                .ok_or(OsalError::InvalidParam)?;
            line.enabled = enabled;
            Ok(())
        })
    }

    pub fn enable(&self, handle: ExtiHandle) -> OsalResult {
        self.set_enabled(handle, true)
    }

    pub fn disable(&self, handle: ExtiHandle) -> OsalResult {
        self.set_enabled(handle, false)
    }

    pub fn is_enabled(&self, handle: ExtiHandle) -> bool {
        critical_section(|cs| self.lines.get(cs).get(handle.0).is_some_and(|l| l.enabled))
    }

    /// Wait for the next edge on the line
    pub fn wait(&self, handle: ExtiHandle, timeout: Tick) -> OsalResult {
        let live = critical_section(|cs| self.lines.get(cs).contains(handle.0));
        if !live {
            return Err(OsalError::InvalidParam);
        }
        self.events[handle.line()].wait(EXTI_EVENT, WaitMode::Any, true, timeout)?;
        Ok(())
    }

    /// ISR entry: an edge on `pin`
    ///
    /// Unregistered and disabled lines are ignored.
    pub fn on_interrupt(&self, pin: u16) {
        let Some(line) = line_of(pin).filter(|&line| line < N) else {
            return;
        };
        let callback = critical_section(|cs| {
            let lines = self.lines.get(cs);
            let key = lines.key_of(line)?;
            let entry = lines.get(key)?;
            entry.enabled.then_some(entry.callback)
        });

        if let Some(callback) = callback {
            let _ = self.events[line].set(EXTI_EVENT);
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}

impl<B: Osal, const N: usize> Default for ExtiRegistry<B, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_of() {
        assert_eq!(line_of(1 << 0), Some(0));
        assert_eq!(line_of(1 << 13), Some(13));
        assert_eq!(line_of(0), None);
        assert_eq!(line_of(0b11), None);
    }
}
