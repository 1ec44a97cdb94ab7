//! # Modio Core Library
//!
//! Process image synchronization for industrial controllers: devices and
//! I/O points mapped onto a shared process image, cyclic background
//! refresh, a cycle loop for PLC-style programs and an event dispatcher
//! for edge-triggered callbacks.
//!
//! # Module Structure
//!
//! - [`address_map`] - Device placement inside the process image
//! - [`channel`] - Process image handle and I/O error accounting
//! - [`device`] - Device buffers and event registrations
//! - [`io`] - I/O points and value encoding
//! - [`event`] - Edge selection and event registrations
//! - [`refresh`] - Background refresh thread
//! - [`cycle`] - Cycle loop and cycle tools
//! - [`dispatch`] - Change detection, delayed and threaded firing
//! - [`lifecycle`] - SIGINT/SIGTERM shutdown
//! - [`modio`] - The process image manager
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             ModIo                                │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │  Process    │◄──►│  Refresh     │◄──►│  Devices            │  │
//! │  │  image      │    │  thread      │    │  (live / snapshot)  │  │
//! │  └─────────────┘    └──────┬───────┘    └──────────┬──────────┘  │
//! │                            │ data ready            │             │
//! │                            ▼                       ▼             │
//! │                   ┌────────────────┐    ┌─────────────────────┐  │
//! │                   │  cycle_loop /  │───►│  Event dispatcher   │  │
//! │                   │  mainloop      │    │                     │  │
//! │                   └────────────────┘    └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod address_map;
pub mod channel;
pub mod cycle;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod io;
pub mod lifecycle;
pub mod modio;
pub mod ready;
pub mod refresh;
pub mod state;

// Re-export key types for convenience
pub use crate::channel::ImageHandle;
pub use crate::cycle::CycleTools;
pub use crate::device::Device;
pub use crate::error::{ModIoError, Result};
pub use crate::event::{Edge, EventOptions, RegistrationId};
pub use crate::io::{IoPoint, IoValue};
pub use crate::modio::{CleanupFn, DeviceSelector, ModIo, Selection};
