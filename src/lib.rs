#![cfg_attr(not(test), no_std)]

//! Firmware platform for Cortex-M3 boards
//!
//! A tick-driven cooperative scheduler runs non-blocking device state
//! machines; byte transports finish their work from interrupt context and
//! hand completion back to those state machines through registered
//! listeners.

#[macro_use]
pub mod logger;

pub mod application;
pub mod config;
pub mod drivers;
pub mod hal;
pub mod protocol;
pub mod rtos;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use rtos::{Runnable, Scheduler, Task, TaskConfig, TaskContext, TaskId};
pub use sync::{Notify, TickFlag};
