//! Daemon subsystem: background tasks, the main loop, signal handling,
//! privilege checks.

pub mod loop_main;
pub mod privilege;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod task;
