//! Typed parameter values.
//!
//! Every parameter payload fits in one 64-bit word in shared memory. The
//! encoding is fixed so independently built producers and consumers agree:
//!
//! | Type    | Tag | Payload (low 32 bits)        |
//! |---------|-----|------------------------------|
//! | `Int`   | 1   | `i32` two's complement       |
//! | `Float` | 2   | `f32` IEEE-754 bit pattern   |
//! | `Bool`  | 3   | `0` or `1`                   |
//!
//! Tag `0` marks an unused parameter block.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Parameter type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ParamType {
    /// 32-bit signed integer.
    Int = 1,
    /// 32-bit float.
    Float = 2,
    /// Boolean.
    Bool = 3,
}

impl ParamType {
    /// Convert from the raw tag stored in a parameter block.
    #[inline]
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::Bool),
            _ => None,
        }
    }

    /// Raw tag stored in a parameter block.
    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

impl FromStr for ParamType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            _ => Err(format!("unknown ParamType: {s:?}")),
        }
    }
}

/// One typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i32),
    /// Float value.
    Float(f32),
}

impl Value {
    /// Zero value of the given type (`0`, `0.0`, `false`).
    #[inline]
    pub const fn zero(ty: ParamType) -> Self {
        match ty {
            ParamType::Int => Self::Int(0),
            ParamType::Float => Self::Float(0.0),
            ParamType::Bool => Self::Bool(false),
        }
    }

    /// Type of this value.
    #[inline]
    pub const fn param_type(&self) -> ParamType {
        match self {
            Self::Int(_) => ParamType::Int,
            Self::Float(_) => ParamType::Float,
            Self::Bool(_) => ParamType::Bool,
        }
    }

    /// Encode into the 64-bit shared-memory payload.
    #[inline]
    pub fn to_bits(self) -> u64 {
        match self {
            Self::Int(v) => v as u32 as u64,
            Self::Float(v) => v.to_bits() as u64,
            Self::Bool(v) => v as u64,
        }
    }

    /// Decode a 64-bit payload written for type `ty`.
    #[inline]
    pub fn from_bits(ty: ParamType, bits: u64) -> Self {
        match ty {
            ParamType::Int => Self::Int(bits as u32 as i32),
            ParamType::Float => Self::Float(f32::from_bits(bits as u32)),
            ParamType::Bool => Self::Bool(bits & 1 == 1),
        }
    }

    /// Integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, if this is a `Float`.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}
