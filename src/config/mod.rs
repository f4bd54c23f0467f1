// src/config/mod.rs

//! Configuration loading and validation for fleetsched.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate settings and campaign definitions (`validate.rs`).
//!
//! Attack dependency cycles are deliberately not checked here; a campaign
//! with a cyclic graph loads fine and fails when it is started.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    FleetConfig, LivenessSection, RawAttackConfig, RawCampaignConfig, RawFleetConfig,
    RetrySection, SchedulerSection,
};
