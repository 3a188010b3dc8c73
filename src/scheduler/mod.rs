//! Attempt scheduling
//!
//! Decides when each registration plan fires relative to its open instant
//! and delivers fire signals to the daemon over a channel.

pub mod config;
pub mod core;

pub use config::SchedulerConfig;
pub use core::{AttemptScheduler, FireSignal, SchedulerPhase};
