// src/liveness/mod.rs

//! Agent liveness.
//!
//! - [`registry`] records registrations and heartbeats.
//! - [`monitor`] runs the periodic sweep that demotes silent agents and
//!   takes their work back.

pub mod monitor;
pub mod registry;

pub use monitor::{LivenessMonitor, LivenessSettings, SweepReport};
pub use registry::AgentRegistry;
