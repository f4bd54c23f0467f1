// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{FleetConfig, RawFleetConfig};
use crate::errors::Result;

/// Load a configuration file and return the raw, unvalidated model.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// range checks and conversion into engine settings.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawFleetConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawFleetConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the entry point for the rest of the application.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<FleetConfig> {
    let raw_config = load_from_path(&path)?;
    FleetConfig::try_from(raw_config)
}

/// `Fleet.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Fleet.toml")
}
