//! Error type of the engine.
//!
//! Recoverable I/O failures never show up here: they are counted, logged
//! with `warn!` and reported to the caller as `Ok(false)`. Everything in
//! [`ModIoError`] terminates the enclosing call.

use modio_common::config::ConfigError;
use thiserror::Error;

/// Errors raised by process image operations and the cyclic loops.
#[derive(Debug, Error)]
pub enum ModIoError {
    /// The consecutive I/O error counter reached its configured maximum.
    #[error("reached max io errors ({max}) during {action}")]
    IoThreshold {
        /// Configured maximum.
        max: u32,
        /// Operation that failed last.
        action: &'static str,
    },

    /// Settings or device configuration could not be used.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A cycle loop or main loop is already active on this instance.
    #[error("can not start multiple loops: a cycle loop or main loop is already running")]
    LoopAlreadyRunning,

    /// A cyclic loop needs at least one device under cyclic refresh.
    #[error("no device is under cyclic refresh; activate autorefresh first")]
    NoAutoRefresh,

    /// Ad-hoc I/O against a device owned by the refresh coordinator.
    #[error("device {position} ({name}) is under cyclic refresh and can not be accessed directly")]
    DeviceSelfUpdating {
        /// Device position.
        position: i64,
        /// Device name.
        name: String,
    },

    /// The refresh interval is fixed while a loop is running.
    #[error("can not change the cycle time while a loop is running")]
    RefreshIntervalLocked,

    /// The refresh coordinator stopped without an exit request.
    #[error("cyclic refresh thread is not running: {0}")]
    RefreshDied(String),

    /// Write access attempted in monitoring mode.
    #[error("{0} is not allowed in monitoring mode")]
    Monitoring(&'static str),

    /// Device lookup failed.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// I/O point lookup failed.
    #[error("io not found: {0}")]
    IoNotFound(String),

    /// Write access to an input or memory point.
    #[error("io '{0}' is read only")]
    ReadOnlyIo(String),

    /// Value does not fit the point.
    #[error("invalid value for io '{io}': {reason}")]
    InvalidValue {
        /// I/O point name.
        io: String,
        /// What was wrong.
        reason: String,
    },

    /// Installing OS signal handlers failed.
    #[error("signal handler setup failed: {0}")]
    Signal(String),

    /// The process image handle was closed by `cleanup`.
    #[error("process image handle is closed")]
    Closed,

    /// Opening the process image or spawning a thread failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModIoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_subject() {
        let err = ModIoError::DeviceSelfUpdating {
            position: 32,
            name: "dio01".into(),
        };
        assert!(err.to_string().contains("dio01"));

        let err = ModIoError::IoThreshold {
            max: 2,
            action: "read_procimg",
        };
        assert!(err.to_string().contains("(2)"));
        assert!(err.to_string().contains("read_procimg"));
    }

    #[test]
    fn config_errors_convert() {
        let err: ModIoError = ConfigError::FileNotFound.into();
        assert!(matches!(err, ModIoError::Config(ConfigError::FileNotFound)));
    }
}
