//! rtlink Common Library
//!
//! Shared constants, device schemas, value types and configuration loading
//! for all rtlink workspace crates. Nothing in here touches shared memory;
//! the region layout and locking live in `rtlink_shm`.
//!
//! # Module Structure
//!
//! - [`consts`] - Limits, defaults and discovery names
//! - [`config`] - Configuration loading traits and types
//! - [`device`] - Device types, parameter schemas and device status
//! - [`value`] - Typed parameter values and their 64-bit wire encoding
//! - [`gamepad`] - Gamepad buttons, axes and snapshots
//! - [`cancel`] - Cancellation token for polling loops
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! rtlink_common = { path = "../rtlink_common" }
//! ```
//!
//! ```rust
//! use rtlink_common::device::DeviceType;
//! use rtlink_common::value::Value;
//!
//! let speed = DeviceType::MotorController.param("speed").unwrap();
//! assert!(speed.1.accepts(&Value::Float(0.5)));
//! ```

#![deny(missing_docs)]

pub mod cancel;
pub mod config;
pub mod consts;
pub mod device;
pub mod gamepad;
pub mod prelude;
pub mod value;
