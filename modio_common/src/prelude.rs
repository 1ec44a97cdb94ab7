//! Prelude module for common re-exports.
//!
//! ```rust
//! use modio_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::logging::setup_tracing;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, ModIoSettings, SharedConfig};

// ─── Device configuration ───────────────────────────────────────────
pub use crate::pictory::{
    locate_config, DeviceDescriptor, DeviceKind, DevicePosition, IoDescriptor, PictoryConfig,
};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_CYCLE_TIME_MS, DEFAULT_PROCIMG};

/// Default refresh interval as Duration.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(DEFAULT_CYCLE_TIME_MS as u64);
