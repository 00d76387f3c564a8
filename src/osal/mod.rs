//! Portable RTOS primitive layer
//!
//! One contract for threads, mutexes, semaphores, event groups, timers,
//! critical sections and delays. [`kernel::Kernel`] binds it to the in-tree
//! kernel, [`host::Host`] to `std` threads. Everything above this module is
//! generic over [`Osal`] and never sees a backend directly.
//!
//! Objects are placed in statics (or registry slots) as `INIT` values and
//! live between one `create` and one `delete`. Any other use returns
//! [`OsalError::Error`].

use critical_section::RestoreState;

use crate::config::CFG_TICK_RATE_HZ;
use crate::error::OsError;

pub mod delay;
#[cfg(all(feature = "mutex", feature = "flag", feature = "tmr"))]
pub mod kernel;
pub mod queue;

#[cfg(feature = "host")]
pub mod host;

pub use queue::MessageQueue;

/// Kernel ticks
pub type Tick = u32;

/// Block until the condition holds
pub const WAIT_FOREVER: Tick = u32::MAX;

/// Never block, report [`OsalError::Timeout`] instead
pub const NO_WAIT: Tick = 0;

/// Event group bit set
pub type EventFlags = u32;

/// What is left of `timeout` once `elapsed` ticks were spent on it
///
/// Lets one timeout cover several waits in a row. `WAIT_FOREVER` and
/// `NO_WAIT` pass through unchanged; a finite budget that is used up is
/// `Timeout`.
pub const fn remaining(timeout: Tick, elapsed: Tick) -> OsalResult<Tick> {
    if timeout == WAIT_FOREVER || timeout == NO_WAIT {
        Ok(timeout)
    } else if elapsed >= timeout {
        Err(OsalError::Timeout)
    } else {
        Ok(timeout - elapsed)
    }
}

/// Convert milliseconds to ticks, rounding non-zero values up to one tick
pub const fn ms_to_ticks(ms: u32) -> Tick {
    if ms == 0 {
        return 0;
    }
    let ticks = (ms as u64 * CFG_TICK_RATE_HZ as u64) / 1000;
    if ticks == 0 {
        1
    } else if ticks >= WAIT_FOREVER as u64 {
        WAIT_FOREVER - 1
    } else {
        ticks as Tick
    }
}

/// Convert ticks to milliseconds
pub const fn ticks_to_ms(ticks: Tick) -> u64 {
    ticks as u64 * 1000 / CFG_TICK_RATE_HZ as u64
}

/// Event wait combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitMode {
    /// Any requested bit
    Any,
    /// Every requested bit
    All,
}

impl WaitMode {
    /// Whether `current` satisfies a wait for `requested`
    #[inline]
    pub fn satisfied(self, current: EventFlags, requested: EventFlags) -> bool {
        match self {
            WaitMode::Any => current & requested != 0,
            WaitMode::All => current & requested == requested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerMode {
    OneShot,
    Periodic,
}

/// Primitive layer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OsalError {
    /// Runtime or hardware failure, or misuse of an object's lifecycle
    Error = 1,
    /// Caller passed an argument that can never be valid
    InvalidParam = 2,
    /// A fixed-capacity table is full
    ResourceExhausted = 3,
    /// A wait ran out of time
    Timeout = 4,
}

pub type OsalResult<T = ()> = Result<T, OsalError>;

/// Flat status code for callers that want one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Error = 1,
    InvalidParam = 2,
    ResourceExhausted = 3,
    Timeout = 4,
}

impl Status {
    pub fn of<T>(result: &OsalResult<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => (*e).into(),
        }
    }
}

impl From<OsalError> for Status {
    fn from(e: OsalError) -> Self {
        match e {
            OsalError::Error => Status::Error,
            OsalError::InvalidParam => Status::InvalidParam,
            OsalError::ResourceExhausted => Status::ResourceExhausted,
            OsalError::Timeout => Status::Timeout,
        }
    }
}

impl From<OsError> for OsalError {
    fn from(e: OsError) -> Self {
        match e {
            e if e.is_expiry() => OsalError::Timeout,
            e if e.is_param_error() => OsalError::InvalidParam,
            _ => OsalError::Error,
        }
    }
}

/// Saved interrupt state returned by [`Osal::critical_enter`]
#[must_use]
pub struct CriticalToken(RestoreState);

/// Backend capability
///
/// Critical sections default to the `critical-section` implementation
/// linked into the binary, which both backends share.
pub trait Osal: 'static {
    type Thread: OsalThread;
    type Mutex: OsalMutex;
    type Semaphore: OsalSemaphore;
    type Event: OsalEvent;
    type Timer: OsalTimer;

    /// Mask interrupts; nests in task and interrupt context
    fn critical_enter() -> CriticalToken {
        // SAFETY: released by `critical_exit` with the same token.
        CriticalToken(unsafe { critical_section::acquire() })
    }

    /// Restore the state saved by the matching [`Osal::critical_enter`]
    fn critical_exit(token: CriticalToken) {
        // SAFETY: the token can only come from `critical_enter`.
        unsafe { critical_section::release(token.0) }
    }

    /// Sleep, yielding to other threads when a scheduler is running
    fn delay_ms(ms: u32);

    /// Busy-wait; imprecise when preempted
    fn delay_us(us: u32);

    fn tick_count() -> Tick;

    fn in_isr() -> bool;
}

/// Thread entry point, called with the registered argument
pub type ThreadEntry = fn(usize);

/// Timer callback, called from the backend's timer service context
pub type TimerCallback = fn(usize);

pub trait OsalThread: Sync + 'static {
    const INIT: Self;

    /// Create a thread that does not run until [`start`](Self::start)
    ///
    /// Priority 0 is highest. Returning from `entry` deletes the thread.
    fn create(
        &'static self,
        name: &'static str,
        entry: ThreadEntry,
        arg: usize,
        stack: &'static mut [u32],
        priority: u8,
    ) -> OsalResult;

    /// Make a created or stopped thread runnable
    fn start(&self) -> OsalResult;

    /// Suspend the thread
    fn stop(&self) -> OsalResult;

    /// Delete the thread; the calling thread may delete itself
    fn delete(&self) -> OsalResult;
}

/// Owner-tracked recursive mutex
pub trait OsalMutex: Sync + 'static {
    const INIT: Self;

    fn create(&self, name: &'static str) -> OsalResult;
    fn lock(&self, timeout: Tick) -> OsalResult;
    fn unlock(&self) -> OsalResult;
    fn delete(&self) -> OsalResult;
}

pub trait OsalSemaphore: Sync + 'static {
    const INIT: Self;

    fn create(&self, name: &'static str, initial: u32) -> OsalResult;
    fn wait(&self, timeout: Tick) -> OsalResult;
    fn post(&self) -> OsalResult;
    /// Post without scheduling; never blocks
    fn post_from_isr(&self) -> OsalResult;
    fn delete(&self) -> OsalResult;
}

pub trait OsalEvent: Sync + 'static {
    const INIT: Self;

    fn create(&self, name: &'static str) -> OsalResult;

    /// Set bits; interrupt safe
    fn set(&self, flags: EventFlags) -> OsalResult;

    /// Clear bits; interrupt safe
    fn clear(&self, flags: EventFlags) -> OsalResult;

    /// Wait for `requested` bits
    ///
    /// Returns the flags observed when the condition became true, before
    /// `clear_on_exit` removes the requested bits.
    fn wait(
        &self,
        requested: EventFlags,
        mode: WaitMode,
        clear_on_exit: bool,
        timeout: Tick,
    ) -> OsalResult<EventFlags>;

    /// Current flags, without waiting
    fn get(&self) -> OsalResult<EventFlags>;

    fn delete(&self) -> OsalResult;
}

pub trait OsalTimer: Sync + 'static {
    const INIT: Self;

    /// Create a stopped timer
    fn create(
        &'static self,
        name: &'static str,
        callback: TimerCallback,
        arg: usize,
        period_ms: u32,
        mode: TimerMode,
    ) -> OsalResult;

    /// Start, or restart the countdown of a running timer
    fn start(&self) -> OsalResult;
    fn stop(&self) -> OsalResult;

    /// Apply a new period, keeping the run state
    fn change_period(&self, period_ms: u32) -> OsalResult;
    fn delete(&self) -> OsalResult;
    fn is_active(&self) -> bool;
}
