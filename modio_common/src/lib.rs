//! Modio Common Library
//!
//! Shared constants, settings loading and the device configuration model
//! for all modio workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Cycle time limits and default paths
//! - [`config`] - Settings loading traits and types
//! - [`logging`] - Tracing subscriber setup
//! - [`pictory`] - Device configuration descriptors and file locator
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust,no_run
//! use modio_common::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), ConfigError> {
//! let settings = ModIoSettings::load(Path::new("modio.toml"))?;
//! let path = locate_config(settings.configrsc.as_deref())?;
//! let _config = PictoryConfig::load(&path)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consts;
pub mod logging;
pub mod pictory;
pub mod prelude;
