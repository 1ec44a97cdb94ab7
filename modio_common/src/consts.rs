//! System-wide constants for the modio workspace.
//!
//! Single source of truth for cycle timing limits and default paths.
//! Imported by all crates; values are defined here only.

use static_assertions::const_assert;

/// Default process image character device.
pub const DEFAULT_PROCIMG: &str = "/dev/piControl0";

/// Locations probed for the device configuration when no explicit path is given.
pub const KNOWN_CONFIG_PATHS: [&str; 2] = ["/etc/revpi/config.rsc", "/opt/KUNBUS/config.rsc"];

/// Default refresh interval of the cyclic process image synchronization [ms].
pub const DEFAULT_CYCLE_TIME_MS: u32 = 50;

/// Smallest accepted refresh interval [ms].
pub const MIN_CYCLE_TIME_MS: u32 = 10;

/// Largest accepted refresh interval [ms].
pub const MAX_CYCLE_TIME_MS: u32 = 2000;

/// Foreground loops wait `interval * NUM / DEN` for fresh data (2.5 cycles)
/// before re-checking that the refresh thread is still alive.
pub const DATA_READY_TIMEOUT_NUM: u32 = 5;

/// See [`DATA_READY_TIMEOUT_NUM`].
pub const DATA_READY_TIMEOUT_DEN: u32 = 2;

/// Legacy position label written by old configuration tools for adapters.
pub const ADAPTER_POSITION_LABEL: &str = "adap.";

/// Interval at which the shutdown watcher polls the signal token [ms].
pub const SIGNAL_POLL_INTERVAL_MS: u64 = 20;

const_assert!(MIN_CYCLE_TIME_MS > 0);
const_assert!(MIN_CYCLE_TIME_MS <= DEFAULT_CYCLE_TIME_MS);
const_assert!(DEFAULT_CYCLE_TIME_MS <= MAX_CYCLE_TIME_MS);
const_assert!(DATA_READY_TIMEOUT_NUM > DATA_READY_TIMEOUT_DEN);
