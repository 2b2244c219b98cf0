//! # rtlink Shared Device Table
//!
//! A shared-memory device/parameter table for a robot runtime. The
//! device-handling process owns one region; control code and the gamepad
//! poller attach to it and exchange device state without a round-trip
//! through any server.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────────┐    ┌─────────────────┐
//! │ Device handler  │    │  /dev/shm/rtlink_*   │    │ Control code    │
//! │                 │    │                      │    │                 │
//! │ RegionOwner     ├───►│ Header               │◄───┤ RegionHandle    │
//! │ add / remove    │    │ Gamepad block        │    │ get / set       │
//! │ publish / touch │    │ Device slots         │    │                 │
//! └─────────────────┘    │  └ parameter blocks  │    └─────────────────┘
//!                        └──────────────────────┘
//!                                   ▲
//!                        ┌──────────┴──────────┐
//!                        │ Gamepad poller      │
//!                        │ RegionHandle        │
//!                        └─────────────────────┘
//! ```
//!
//! ## Synchronization
//!
//! - Every parameter block and the gamepad block carry a [`VersionCounter`]:
//!   readers never block, writers take a short exclusive section.
//! - Device identity is versioned separately, so a removed device can never
//!   be read through an old handle, even after its slot is reused.
//! - Add, remove and grow serialize on a structural lock recording the
//!   holder's pid; it never blocks get/set.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rtlink_shm::{RegionHandle, RegionOwner, ShmResult};
//! use rtlink_common::device::DeviceType;
//! use rtlink_common::value::Value;
//!
//! # fn main() -> ShmResult<()> {
//! // Device-handling process
//! let owner = RegionOwner::create_in("/dev/shm", "robot", 16)?;
//! let motor = owner.add_device("left_motor", DeviceType::MotorController)?;
//! owner.publish_value(&motor, "velocity", Value::Float(0.0))?;
//!
//! // Control process
//! let region = RegionHandle::attach_in("/dev/shm", "robot")?;
//! region.set_value("left_motor", "speed", Value::Float(0.5))?;
//! let v = region.get_value("left_motor", "velocity")?;
//! # let _ = v;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use rtlink_shm::{RegionHandle, ShmError};
//!
//! # let region = RegionHandle::attach_in("/dev/shm", "robot").unwrap();
//! match region.get_value("bumper", "switch0") {
//!     Ok(v) => println!("bumper: {v}"),
//!     Err(e) if e.is_device_level() => eprintln!("skip this cycle: {e}"),
//!     Err(e) => eprintln!("re-attach needed: {e}"),
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod discovery;
pub mod error;
pub mod gamepad;
pub mod layout;
pub mod monitoring;
pub mod platform;
pub mod region;
pub mod table;
pub mod version;

pub use discovery::{DiscoveredRegion, RegionDiscovery, RegionInfo, RegionLiveness};
pub use error::{ShmError, ShmResult};
pub use gamepad::{ButtonEvent, ButtonWatcher, GamepadPoller, GamepadSample, GamepadSource};
pub use layout::{RegionHeader, RegionState};
pub use monitoring::{RegionDump, RegionStats};
pub use region::{RegionHandle, RegionOwner};
pub use table::{DeviceHandle, DeviceSummary, Devices, ParamMask};
pub use version::VersionCounter;
