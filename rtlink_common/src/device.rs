//! Device types, parameter schemas and device status.
//!
//! Schemas are static per [`DeviceType`]: the type alone fixes parameter
//! names, types, access and defaults. Name lookup is a linear scan over at
//! most [`MAX_PARAMS`] entries and never allocates.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEVICE_ID_LEN, MAX_PARAMS, NAME_LEN};
use crate::value::{ParamType, Value};

/// Device identifier, stack allocated.
pub type DeviceId = heapless::String<DEVICE_ID_LEN>;

/// Short name (parameter or control id) carried in errors.
pub type Name = heapless::String<NAME_LEN>;

/// Device identifier validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceIdError {
    /// Identifier is empty.
    #[error("device id is empty")]
    Empty,
    /// Identifier exceeds [`DEVICE_ID_LEN`] bytes.
    #[error("device id is {len} bytes, limit is {max}", max = DEVICE_ID_LEN)]
    TooLong {
        /// Actual length in bytes.
        len: usize,
    },
}

/// Validate and copy a device identifier.
pub fn parse_device_id(id: &str) -> Result<DeviceId, DeviceIdError> {
    if id.is_empty() {
        return Err(DeviceIdError::Empty);
    }
    let mut out = DeviceId::new();
    out.push_str(id)
        .map_err(|_| DeviceIdError::TooLong { len: id.len() })?;
    Ok(out)
}

/// Copy `s` into a [`Name`], truncating at a char boundary when too long.
pub fn short_name(s: &str) -> Name {
    let mut out = Name::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ─── Access ─────────────────────────────────────────────────────────

/// Who may write a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Sensor reading, written only by the device-handling process.
    ReadOnly,
    /// Command, writable by any attached process.
    ReadWrite,
}

// ─── ParamSpec ──────────────────────────────────────────────────────

/// Static description of one parameter in a device schema.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Parameter name as used by control code.
    pub name: &'static str,
    /// Value type.
    pub ty: ParamType,
    /// Write permission for client processes.
    pub access: Access,
    /// Value a freshly added device starts with.
    pub default: Value,
}

impl ParamSpec {
    /// Read-only sensor parameter with a zero default.
    pub const fn sensor(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            access: Access::ReadOnly,
            default: Value::zero(ty),
        }
    }

    /// Writable command parameter with a zero default.
    pub const fn command(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            access: Access::ReadWrite,
            default: Value::zero(ty),
        }
    }

    /// Override the default value.
    pub const fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    /// Whether client processes may write this parameter.
    #[inline]
    pub const fn is_writable(&self) -> bool {
        matches!(self.access, Access::ReadWrite)
    }

    /// Whether `value` has this parameter's type.
    #[inline]
    pub const fn accepts(&self, value: &Value) -> bool {
        value.param_type() as u8 == self.ty as u8
    }
}

// ─── Schemas ────────────────────────────────────────────────────────

const LIMIT_SWITCH: &[ParamSpec] = &[
    ParamSpec::sensor("switch0", ParamType::Bool),
    ParamSpec::sensor("switch1", ParamType::Bool),
    ParamSpec::sensor("switch2", ParamType::Bool),
];

const LINE_FOLLOWER: &[ParamSpec] = &[
    ParamSpec::sensor("left", ParamType::Float),
    ParamSpec::sensor("center", ParamType::Float),
    ParamSpec::sensor("right", ParamType::Float),
];

const POTENTIOMETER: &[ParamSpec] = &[
    ParamSpec::sensor("pot0", ParamType::Float),
    ParamSpec::sensor("pot1", ParamType::Float),
    ParamSpec::sensor("pot2", ParamType::Float),
];

const ENCODER: &[ParamSpec] = &[ParamSpec::sensor("rotation", ParamType::Int)];

const SERVO_CONTROL: &[ParamSpec] = &[
    ParamSpec::command("servo0", ParamType::Float),
    ParamSpec::command("servo1", ParamType::Float),
];

const MOTOR_CONTROLLER: &[ParamSpec] = &[
    ParamSpec::command("speed", ParamType::Float),
    ParamSpec::command("invert", ParamType::Bool),
    ParamSpec::command("deadband", ParamType::Float).with_default(Value::Float(0.05)),
    ParamSpec::sensor("enc_pos", ParamType::Int),
    ParamSpec::sensor("velocity", ParamType::Float),
];

const SIMPLE_TEST_DEVICE: &[ParamSpec] = &[
    ParamSpec::sensor("increasing", ParamType::Int),
    ParamSpec::sensor("doubling", ParamType::Float).with_default(Value::Float(1.0)),
    ParamSpec::sensor("flip_flop", ParamType::Bool),
    ParamSpec::command("my_int", ParamType::Int),
];

// ─── DeviceType ─────────────────────────────────────────────────────

/// Closed set of recognized device types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum DeviceType {
    /// Three digital limit switches.
    LimitSwitch = 0,
    /// Three-channel reflectance line follower.
    LineFollower = 1,
    /// Three potentiometers.
    Potentiometer = 2,
    /// Rotary encoder.
    Encoder = 3,
    /// Two-channel servo controller.
    ServoControl = 4,
    /// Motor controller with encoder feedback.
    MotorController = 5,
    /// Synthetic device with self-updating sensors, used in tests.
    SimpleTestDevice = 6,
}

impl DeviceType {
    /// Every recognized device type.
    pub const ALL: [DeviceType; 7] = [
        Self::LimitSwitch,
        Self::LineFollower,
        Self::Potentiometer,
        Self::Encoder,
        Self::ServoControl,
        Self::MotorController,
        Self::SimpleTestDevice,
    ];

    /// Convert from the raw `u16` stored in a device slot.
    #[inline]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::LimitSwitch),
            1 => Some(Self::LineFollower),
            2 => Some(Self::Potentiometer),
            3 => Some(Self::Encoder),
            4 => Some(Self::ServoControl),
            5 => Some(Self::MotorController),
            6 => Some(Self::SimpleTestDevice),
            _ => None,
        }
    }

    /// Canonical snake_case name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::LimitSwitch => "limit_switch",
            Self::LineFollower => "line_follower",
            Self::Potentiometer => "potentiometer",
            Self::Encoder => "encoder",
            Self::ServoControl => "servo_control",
            Self::MotorController => "motor_controller",
            Self::SimpleTestDevice => "simple_test_device",
        }
    }

    /// Parameter schema of this type.
    pub const fn schema(self) -> &'static [ParamSpec] {
        match self {
            Self::LimitSwitch => LIMIT_SWITCH,
            Self::LineFollower => LINE_FOLLOWER,
            Self::Potentiometer => POTENTIOMETER,
            Self::Encoder => ENCODER,
            Self::ServoControl => SERVO_CONTROL,
            Self::MotorController => MOTOR_CONTROLLER,
            Self::SimpleTestDevice => SIMPLE_TEST_DEVICE,
        }
    }

    /// Look up a parameter by name, returning its index in the schema.
    pub fn param(self, name: &str) -> Option<(usize, &'static ParamSpec)> {
        self.schema()
            .iter()
            .enumerate()
            .find(|(_, spec)| spec.name == name)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for DeviceType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| format!("unknown DeviceType: {s:?}"))
    }
}

// ─── DeviceStatus ───────────────────────────────────────────────────

/// Lifecycle state of a device slot.
///
/// `Uninitialized -> Connected <-> Stale -> Disconnected`. `Free` marks a
/// slot that never held a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum DeviceStatus {
    /// Slot never used.
    Free = 0,
    /// Slot reserved, parameters being initialized.
    Uninitialized = 1,
    /// Device attached and refreshed.
    Connected = 2,
    /// Device liveness marker not refreshed within the timeout.
    Stale = 3,
    /// Device removed; terminal for this instance.
    Disconnected = 4,
}

impl DeviceStatus {
    /// Convert from the raw `u32` stored in a device slot.
    #[inline]
    pub const fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Free),
            1 => Some(Self::Uninitialized),
            2 => Some(Self::Connected),
            3 => Some(Self::Stale),
            4 => Some(Self::Disconnected),
            _ => None,
        }
    }

    /// Whether the device counts as present in the table.
    #[inline]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Connected | Self::Stale)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connected => write!(f, "connected"),
            Self::Stale => write!(f, "stale"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ─── RunMode ────────────────────────────────────────────────────────

/// Robot run mode published in the region header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum RunMode {
    /// Robot disabled; control code not running.
    #[default]
    Idle = 0,
    /// Autonomous period.
    Auto = 1,
    /// Driver-controlled period.
    Teleop = 2,
}

impl RunMode {
    /// Convert from the raw `u32` stored in the header.
    #[inline]
    pub const fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Auto),
            2 => Some(Self::Teleop),
            _ => None,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Auto => write!(f, "autonomous"),
            Self::Teleop => write!(f, "teleop"),
        }
    }
}

const _: () = {
    let mut i = 0;
    while i < DeviceType::ALL.len() {
        assert!(DeviceType::ALL[i].schema().len() <= MAX_PARAMS);
        i += 1;
    }
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_roundtrip() {
        for ty in DeviceType::ALL {
            assert_eq!(DeviceType::from_u16(ty as u16), Some(ty));
            assert_eq!(ty.name().parse::<DeviceType>().unwrap(), ty);
        }
        assert!(DeviceType::from_u16(7).is_none());
        assert!("flux_capacitor".parse::<DeviceType>().is_err());
    }

    #[test]
    fn schema_names_are_unique() {
        for ty in DeviceType::ALL {
            let schema = ty.schema();
            for (i, a) in schema.iter().enumerate() {
                for b in &schema[i + 1..] {
                    assert_ne!(a.name, b.name, "{ty}: duplicate {}", a.name);
                }
            }
        }
    }

    #[test]
    fn defaults_match_declared_types() {
        for ty in DeviceType::ALL {
            for spec in ty.schema() {
                assert!(spec.accepts(&spec.default), "{ty}.{}", spec.name);
            }
        }
    }

    #[test]
    fn motor_speed_is_writable_float() {
        let (idx, spec) = DeviceType::MotorController.param("speed").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(spec.ty, ParamType::Float);
        assert!(spec.is_writable());
        assert!(!spec.accepts(&Value::Int(1)));
    }

    #[test]
    fn encoder_rotation_is_sensor() {
        let (_, spec) = DeviceType::Encoder.param("rotation").unwrap();
        assert!(!spec.is_writable());
        assert!(DeviceType::Encoder.param("speed").is_none());
    }

    #[test]
    fn device_id_validation() {
        assert_eq!(parse_device_id("motor1").unwrap().as_str(), "motor1");
        assert_eq!(parse_device_id(""), Err(DeviceIdError::Empty));
        let long = "x".repeat(DEVICE_ID_LEN + 1);
        assert_eq!(
            parse_device_id(&long),
            Err(DeviceIdError::TooLong { len: DEVICE_ID_LEN + 1 })
        );
        assert!(parse_device_id(&"y".repeat(DEVICE_ID_LEN)).is_ok());
    }

    #[test]
    fn short_name_truncates() {
        let long = "p".repeat(NAME_LEN + 10);
        assert_eq!(short_name(&long).len(), NAME_LEN);
        assert_eq!(short_name("speed").as_str(), "speed");
    }

    #[test]
    fn status_presence() {
        assert!(DeviceStatus::Connected.is_present());
        assert!(DeviceStatus::Stale.is_present());
        assert!(!DeviceStatus::Disconnected.is_present());
        assert_eq!(DeviceStatus::from_raw(4), Some(DeviceStatus::Disconnected));
        assert_eq!(DeviceStatus::from_raw(9), None);
    }

    #[test]
    fn run_mode_raw() {
        assert_eq!(RunMode::from_raw(2), Some(RunMode::Teleop));
        assert_eq!(RunMode::default(), RunMode::Idle);
    }
}
