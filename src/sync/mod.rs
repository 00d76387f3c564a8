//! Synchronization primitives
//!
//! Semaphores, mutexes and event flag groups sharing one pend protocol.

pub mod pend_list;

#[cfg(feature = "sem")]
pub mod sem;

#[cfg(feature = "mutex")]
pub mod mutex;

#[cfg(feature = "flag")]
pub mod flag;
