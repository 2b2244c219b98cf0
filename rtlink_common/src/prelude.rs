//! Prelude module for common re-exports.
//!
//! `use rtlink_common::prelude::*;` brings in the types nearly every
//! rtlink process touches.
//!
//! # Usage
//!
//! ```rust
//! use rtlink_common::prelude::*;
//!
//! assert_eq!(DeviceType::Encoder.name(), "encoder");
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, GamepadConfig, RegionConfig, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{MAX_DEVICES, MAX_PARAMS};

// ─── Devices & Values ───────────────────────────────────────────────
pub use crate::device::{Access, DeviceId, DeviceStatus, DeviceType, ParamSpec, RunMode};
pub use crate::value::{ParamType, Value};

// ─── Gamepad ────────────────────────────────────────────────────────
pub use crate::gamepad::{GamepadAxis, GamepadButtons, GamepadControl, GamepadSnapshot};

// ─── Loops ──────────────────────────────────────────────────────────
pub use crate::cancel::CancellationToken;
