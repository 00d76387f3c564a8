//! Kernel error codes
//!
//! Numbering follows the μC/OS-III error families. These codes stay inside
//! the kernel backend; the primitive layer folds them into
//! [`OsalError`](crate::osal::OsalError).

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // Called from interrupt context
    AcceptIsr = 10001,
    CreateIsr = 12001,
    DelIsr = 13001,
    PendIsr = 25006,
    TaskCreateIsr = 29002,
    TaskDelIsr = 29006,
    TaskSuspendIsr = 29017,
    TaskResumeIsr = 29020,
    TimeDlyIsr = 29301,

    // Rejected arguments, see `is_param_error`
    FlagPendOpt = 15103,
    OptInvalid = 24101,
    PrioInvalid = 25203,
    StkInvalid = 28207,
    StkSizeInvalid = 28208,
    TmrInvalidPeriod = 29504,

    // Object lifecycle
    /// Already created
    ObjCreated = 24001,
    /// Deleted while a task waited on it
    ObjDel = 24002,
    /// Not created, or not the expected kind of object
    ObjType = 24004,
    TcbInvalid = 29101,

    // Counters
    MutexOvf = 22404,
    SemOvf = 28101,

    MutexNotOwner = 22401,

    OsNotRunning = 24201,
    OsRunning = 24202,
    OsNotInit = 24203,
    /// `os_start` found nothing to run
    OsNoAppTask = 24204,

    PendAbort = 25001,
    /// Non-blocking pend found the object unavailable
    PendWouldBlock = 25008,
    Timeout = 29401,

    TaskDelIdle = 29004,
    TaskNotSuspended = 29011,
    TaskSuspendIdle = 29019,

    TmrInactive = 29501,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Caller passed something the kernel can never accept.
    pub fn is_param_error(self) -> bool {
        matches!(
            self,
            OsError::PrioInvalid
                | OsError::StkInvalid
                | OsError::StkSizeInvalid
                | OsError::OptInvalid
                | OsError::FlagPendOpt
                | OsError::TmrInvalidPeriod
        )
    }

    /// The pend ended without the object being granted
    pub fn is_expiry(self) -> bool {
        matches!(self, OsError::Timeout | OsError::PendWouldBlock)
    }
}
