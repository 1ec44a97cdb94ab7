//! Device configuration model.
//!
//! The configuration tool writes a JSON document listing every device with
//! its I/O entries. It is parsed once at startup; the engine never re-reads it.

pub mod descriptor;
pub mod loader;

pub use descriptor::{region_span, DeviceDescriptor, DeviceKind, DevicePosition, IoDescriptor};
pub use loader::{locate_config, AppInfo, PictoryConfig, Summary};
