//! Configuration file loading and path resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Logging section shared by every AIMI binary
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locate the TOML configuration file for `app`
///
/// An explicitly given path must exist. Otherwise the user config
/// (`~/.config/<app>/config.toml`) wins over the system one
/// (`/etc/<app>/config.toml`). Returns `None` when no file is present.
pub fn locate_config_file(explicit: Option<&Path>, app: &str) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let user_config = dirs::config_dir().map(|d| d.join(app).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let system_config = PathBuf::from("/etc").join(app).join("config.toml");
    if cfg!(unix) && system_config.exists() {
        return Ok(Some(system_config));
    }

    Ok(None)
}

/// Parse a TOML file into `T`, or return `T::default()` when no file is given
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Resolve a path setting through CLI → ENV → TOML → default
pub fn resolve_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default()
}

/// Get OS-dependent default data folder for `app`
pub fn default_data_dir(app: &str) -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/<app> (or /var/lib/<app> for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(app))
            .unwrap_or_else(|| PathBuf::from("/var/lib").join(app))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(app))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support").join(app))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(app))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData").join(app))
    } else {
        PathBuf::from(format!("./{}_data", app))
    }
}

/// Parse a boolean environment flag the way the shell scripts set them
///
/// `true`, `1`, `yes` and `on` (any case) are true; anything else is false.
/// Returns `None` when the variable is unset.
pub fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        )
    })
}

/// Parse an environment variable with `FromStr`
///
/// Unset or empty variables are `Ok(None)`; unparsable ones are config errors.
pub fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e))),
        _ => Ok(None),
    }
}
