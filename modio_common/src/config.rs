//! Engine settings loading.
//!
//! Settings are plain TOML files deserialized through the blanket
//! [`ConfigLoader`] trait. The device configuration itself (JSON) lives in
//! [`crate::pictory`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use modio_common::config::{ConfigError, ConfigLoader, ModIoSettings};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let settings = ModIoSettings::load(Path::new("modio.toml"))?;
//!     settings.validate()?;
//!     println!("Process image: {}", settings.procimg.display());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consts::{DEFAULT_CYCLE_TIME_MS, DEFAULT_PROCIMG, MAX_CYCLE_TIME_MS, MIN_CYCLE_TIME_MS};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// Configuration file exists but cannot be read.
    #[error("Configuration not accessible: {0}")]
    NotAccessible(String),

    /// TOML / JSON parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common fields shared by every settings file.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "press-line-01"
/// json_logs = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "modio".to_string(),
            json_logs: false,
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_procimg() -> PathBuf {
    PathBuf::from(DEFAULT_PROCIMG)
}

fn default_cycle_time_ms() -> u32 {
    DEFAULT_CYCLE_TIME_MS
}

fn default_true() -> bool {
    true
}

/// Settings of one process image manager.
///
/// # TOML Example
///
/// ```toml
/// autorefresh = true
/// monitoring = false
/// procimg = "/dev/piControl0"
/// configrsc = "/etc/revpi/config.rsc"
/// cycle_time_ms = 20
/// max_io_errors = 5
///
/// [shared]
/// service_name = "press-line-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModIoSettings {
    /// Place every device under cyclic refresh right after configuration.
    #[serde(default)]
    pub autorefresh: bool,

    /// Read inputs and outputs, never write.
    #[serde(default)]
    pub monitoring: bool,

    /// Load currently set outputs from the process image at startup.
    #[serde(default = "default_true")]
    pub syncoutputs: bool,

    /// Process image path.
    #[serde(default = "default_procimg")]
    pub procimg: PathBuf,

    /// Explicit device configuration path; known locations are probed when absent.
    #[serde(default)]
    pub configrsc: Option<PathBuf>,

    /// Swap inputs and outputs (drive virtual devices from the program side).
    #[serde(default)]
    pub simulator: bool,

    /// Refresh interval of the cyclic synchronization [ms].
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u32,

    /// Consecutive I/O errors tolerated before a fatal error; 0 = unlimited.
    #[serde(default)]
    pub max_io_errors: u32,

    /// Batch writes and flush explicitly after each write pass.
    #[serde(default)]
    pub buffered_write: bool,

    /// Logging and identity.
    #[serde(default)]
    pub shared: SharedConfig,
}

impl Default for ModIoSettings {
    fn default() -> Self {
        Self {
            autorefresh: false,
            monitoring: false,
            syncoutputs: true,
            procimg: default_procimg(),
            configrsc: None,
            simulator: false,
            cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
            max_io_errors: 0,
            buffered_write: false,
            shared: SharedConfig::default(),
        }
    }
}

impl ModIoSettings {
    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the cycle time is outside
    /// `MIN_CYCLE_TIME_MS..=MAX_CYCLE_TIME_MS` or the shared section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cycle_time(self.cycle_time_ms)?;
        self.shared.validate()
    }
}

/// Check a refresh interval against the accepted range.
pub fn validate_cycle_time(milliseconds: u32) -> Result<(), ConfigError> {
    if !(MIN_CYCLE_TIME_MS..=MAX_CYCLE_TIME_MS).contains(&milliseconds) {
        return Err(ConfigError::ValidationError(format!(
            "cycle time must be {MIN_CYCLE_TIME_MS} to {MAX_CYCLE_TIME_MS} ms, got {milliseconds}"
        )));
    }
    Ok(())
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::NotAccessible(format!("{}: {e}", path.display()))
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        for (text, level) in [
            ("trace", LogLevel::Trace),
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let parsed: TestWrapper = toml::from_str(&format!("level = \"{text}\"")).unwrap();
            assert_eq!(parsed.level, level);
            assert_eq!(level.as_directive(), text);
        }
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            service_name: String::new(),
            ..SharedConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ModIoSettings = toml::from_str("").unwrap();
        assert!(!settings.autorefresh);
        assert!(!settings.monitoring);
        assert!(settings.syncoutputs);
        assert_eq!(settings.procimg, PathBuf::from(DEFAULT_PROCIMG));
        assert_eq!(settings.cycle_time_ms, DEFAULT_CYCLE_TIME_MS);
        assert_eq!(settings.max_io_errors, 0);
        assert!(settings.configrsc.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_rejects_unknown_fields() {
        let result: Result<ModIoSettings, _> = toml::from_str("autorefrsh = true");
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_cycle_time_bounds() {
        let mut settings = ModIoSettings::default();
        settings.cycle_time_ms = MIN_CYCLE_TIME_MS - 1;
        assert!(settings.validate().is_err());
        settings.cycle_time_ms = MAX_CYCLE_TIME_MS + 1;
        assert!(settings.validate().is_err());
        settings.cycle_time_ms = MAX_CYCLE_TIME_MS;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = ModIoSettings::load(Path::new("/nonexistent/path/modio.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = ModIoSettings::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_loader_success() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"autorefresh = true
procimg = "/tmp/procimg"
cycle_time_ms = 20
max_io_errors = 3

[shared]
log_level = "debug"
service_name = "test-service"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let settings = ModIoSettings::load(file.path()).unwrap();
        assert!(settings.autorefresh);
        assert_eq!(settings.procimg, PathBuf::from("/tmp/procimg"));
        assert_eq!(settings.cycle_time_ms, 20);
        assert_eq!(settings.max_io_errors, 3);
        assert_eq!(settings.shared.log_level, LogLevel::Debug);
        assert_eq!(settings.shared.service_name, "test-service");
    }
}
