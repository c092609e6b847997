#![no_std]

// Shared logic for the desk clock.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Interrupt handlers, the tick source and the two
// long-running tasks all meet here: the event bus, the periodic scheduler and
// the policy loops that consume them.

pub mod bits;
pub mod bus;
pub mod coordinator;
pub mod network;
pub mod scheduler;
pub mod tasks;
pub mod time;

pub use bits::EventBits;
pub use bus::{EventBus, IsrBus, TaskBus};
pub use scheduler::{IsrScheduler, Repeat, ScheduleError, Scheduler, TaskScheduler};
pub use tasks::PeriodicTask;
