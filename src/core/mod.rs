//! In-tree kernel
//!
//! Backend of [`osal::kernel::Kernel`](crate::osal::kernel::Kernel). Callers
//! outside the crate normally go through the primitive layer instead.

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod kernel;
pub mod prio;
pub mod sched;
pub mod task;
pub mod time;
#[cfg(feature = "tmr")]
pub mod tmr;
pub mod types;
