//! Kernel scalar types, states and option bits

/// 0 is the most urgent
pub type OsPrio = u8;
pub type OsTick = u32;
pub type OsSemCtr = u32;
pub type OsNestingCtr = u8;
pub type OsOpt = u16;
pub type OsStkElement = u32;
pub type OsFlags = u32;

/// Task state
///
/// The `*Suspended` variants keep what the task was doing when it got
/// suspended, so a resume can put it back on the tick wheel or pend list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum OsTaskState {
    Ready = 0,
    Delayed = 1,
    Pend = 2,
    PendTimeout = 3,
    Suspended = 4,
    DelayedSuspended = 5,
    PendSuspended = 6,
    PendTimeoutSuspended = 7,
    /// Never scheduled again; the TCB may be reused
    Deleted = 8,
}

/// Object kind a pending task is queued on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPendOn {
    Nothing = 0,
    Flag = 1,
    Mutex = 2,
    Semaphore = 4,
}

/// Why a pend returned, written by whoever readied the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPendStatus {
    Ok = 0,
    Abort = 1,
    /// The object was deleted under the waiter
    Del = 2,
    Timeout = 3,
}

/// Kernel object marker
///
/// Objects start out as `None` and only carry their marker between
/// `create` and `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OsObjType {
    None = 0,
    Flag = 0x464C4147,  // 'FLAG'
    Mutex = 0x4D555458, // 'MUTX'
    Sem = 0x53454D41,   // 'SEMA'
    Task = 0x5441534B,  // 'TASK'
    Timer = 0x544D5220, // 'TMR '
}

/// Option bits
///
/// Each family is only meaningful to the calls that take it, so values
/// overlap across families.
pub mod opt {
    use super::OsOpt;

    pub const NONE: OsOpt = 0x0000;

    /// Wait for the object
    pub const PEND_BLOCKING: OsOpt = 0x0000;
    /// Return `PendWouldBlock` instead of waiting
    pub const PEND_NON_BLOCKING: OsOpt = 0x8000;

    pub const POST_FIFO: OsOpt = 0x0000;
    /// Ready the waiter without rescheduling (ISR posts)
    pub const POST_NO_SCHED: OsOpt = 0x8000;

    pub const TASK_NONE: OsOpt = 0x0000;
    /// Create the task suspended; it runs after the first resume
    pub const TASK_DONT_START: OsOpt = 0x0100;

    pub const FLAG_CLR: OsOpt = 0x0001;
    pub const FLAG_SET: OsOpt = 0x0002;
    pub const FLAG_SET_ALL: OsOpt = 0x0004;
    pub const FLAG_SET_ANY: OsOpt = 0x0008;
    /// Clear the matched bits when the wait succeeds
    pub const FLAG_CONSUME: OsOpt = 0x0100;

    pub const TMR_ONE_SHOT: OsOpt = 0x0001;
    pub const TMR_PERIODIC: OsOpt = 0x0002;
}
