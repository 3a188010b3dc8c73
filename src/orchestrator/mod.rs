//! Assistance-workflow orchestration
//!
//! The engine owns the request queue for one (session, user) pair and emits
//! an event per transition; the daemon bridges barriers from execution into
//! requests here.

mod engine;
mod events;

pub use engine::WorkflowEngine;
pub use events::WorkflowEvent;
