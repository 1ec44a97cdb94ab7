//! Locating and parsing the device configuration file.

use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::descriptor::DeviceDescriptor;
use crate::config::ConfigError;
use crate::consts::KNOWN_CONFIG_PATHS;

/// Application metadata written by the configuration tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppInfo {
    /// Tool name.
    #[serde(default)]
    pub name: Option<String>,
    /// Tool version.
    #[serde(default)]
    pub version: Option<String>,
    /// UI language.
    #[serde(default)]
    pub language: Option<String>,
    /// Save timestamp.
    #[serde(default, rename = "saveTS")]
    pub save_ts: Option<String>,
}

/// Totals reported by the configuration tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Summary {
    /// Total input bytes.
    #[serde(default, rename = "inpTotal")]
    pub inp_total: Option<u64>,
    /// Total output bytes.
    #[serde(default, rename = "outTotal")]
    pub out_total: Option<u64>,
}

/// Parsed device configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PictoryConfig {
    /// Application metadata.
    #[serde(rename = "App", default)]
    pub app: AppInfo,
    /// Totals.
    #[serde(rename = "Summary", default)]
    pub summary: Summary,
    /// Device descriptors in file order.
    #[serde(rename = "Devices")]
    pub devices: Vec<DeviceDescriptor>,
}

impl PictoryConfig {
    /// Parse configuration text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading device configuration from {:?}", path);
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::NotAccessible(format!("{}: {e}", path.display()))
            }
        })?;
        let config = Self::from_json(&text)?;
        debug!("Configuration lists {} devices", config.devices.len());
        Ok(config)
    }
}

fn is_readable(path: &Path) -> bool {
    File::open(path).is_ok_and(|f| f.metadata().is_ok_and(|m| m.is_file()))
}

/// Resolve the configuration file to use.
///
/// An explicit path must be readable. Without one, [`KNOWN_CONFIG_PATHS`]
/// are probed in order.
pub fn locate_config(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    locate_in(explicit, &KNOWN_CONFIG_PATHS)
}

fn locate_in(explicit: Option<&Path>, candidates: &[&str]) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if is_readable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::NotAccessible(format!(
            "can not access device configuration at {}",
            path.display()
        )));
    }

    candidates
        .iter()
        .map(Path::new)
        .find(|path| is_readable(path))
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            ConfigError::NotAccessible(format!(
                "can not access known device configurations at {} - \
                 set 'configrsc' to specify the location",
                candidates.join(", ")
            ))
        })
}
