//! User configuration loading for tsunagi.
//!
//! User config location: $XDG_CONFIG_HOME/tsunagi/tsunagi.toml
//! Fallback: the platform config directory (`dirs::config_dir()`), e.g.
//! ~/.config/tsunagi/tsunagi.toml on Linux.

use std::path::PathBuf;

use super::{BridgeConfig, ConfigError, load_config_file};

/// Returns the path to the user configuration file.
///
/// Returns None if neither $XDG_CONFIG_HOME nor a platform config directory
/// is available.
pub fn user_config_path() -> Option<PathBuf> {
    if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg_config).join("tsunagi").join("tsunagi.toml"));
    }
    dirs::config_dir().map(|dir| dir.join("tsunagi").join("tsunagi.toml"))
}

/// Load the user configuration file.
///
/// A missing file is not an error and yields `Ok(None)`; a file that exists
/// but cannot be read or parsed is.
pub fn load_user_config() -> Result<Option<BridgeConfig>, ConfigError> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        log::debug!(target: "tsunagi::config", "No user config at {}", path.display());
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}
