//! # rtlink device handler
//!
//! The process that creates and owns the shared device table. It installs the
//! configured devices, keeps the region and every device alive, forwards
//! client commands to the devices and publishes their sensor readings.
//!
//! # Module Structure
//!
//! - [`config`] - `dev_handler.toml` schema and validation
//! - [`handler`] - `DeviceHandler` and the cycle loop
//! - [`virtual_device`] - software device models
//! - [`virtual_gamepad`] - synthetic gamepad source for `--simulate`
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     rtlink_dev_handler                         │
//! │  ┌──────────────┐    ┌───────────────┐    ┌─────────────────┐  │
//! │  │ RegionOwner  │◄──►│ DeviceHandler │◄──►│ VirtualDevice[] │  │
//! │  │ (rtlink_shm) │    │ (cycle loop)  │    │                 │  │
//! │  └──────▲───────┘    └───────────────┘    └─────────────────┘  │
//! │         │            ┌───────────────┐                         │
//! │         └────────────│ GamepadPoller │ (thread, --simulate)    │
//! │                      └───────────────┘                         │
//! └────────────────────────────────────────────────────────────────┘
//! ```

#![deny(warnings)]
#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod virtual_device;
pub mod virtual_gamepad;

pub use crate::config::{DevHandlerConfig, DeviceEntry};
pub use crate::error::HandlerError;
pub use crate::handler::{DeviceHandler, TimingStats};
pub use crate::virtual_device::VirtualDevice;
pub use crate::virtual_gamepad::VirtualGamepad;
