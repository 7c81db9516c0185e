// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::env::apply_env_overrides;
use crate::config::model::{RawServerConfig, ServerConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw config.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawServerConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawServerConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file, apply `CPC_*` environment overrides and
/// validate the result.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let mut raw = load_from_path(&path)?;
    apply_env_overrides(&mut raw)?;
    ServerConfig::try_from(raw)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let path = path.as_ref();
    if path.exists() {
        return load_and_validate(path);
    }
    debug!(path = %path.display(), "config file not found; using defaults");
    let mut raw = RawServerConfig::default();
    apply_env_overrides(&mut raw)?;
    ServerConfig::try_from(raw)
}

/// Default config location: `cpc-server.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("cpc-server.toml")
}
