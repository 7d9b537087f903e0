//! TOML configuration file loading
//!
//! Shared by the controller, node agent and daemon configs. Each service
//! config is a plain serde struct; this module only handles reading and
//! error wrapping.

use crate::error::{FleetError, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::info;

/// Load a TOML config from a file
pub fn load_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        FleetError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;

    parse_toml(&contents)
}

/// Load a TOML config, falling back to `T::default()` when the file is absent
pub fn load_toml_or_default<T: DeserializeOwned + Default, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        info!("No config file at {:?}, using defaults", path);
        return Ok(T::default());
    }
    load_toml(path)
}

/// Parse a TOML config from a string
pub fn parse_toml<T: DeserializeOwned>(toml: &str) -> Result<T> {
    toml::from_str(toml).map_err(|e| FleetError::Config(format!("Failed to parse TOML: {}", e)))
}
