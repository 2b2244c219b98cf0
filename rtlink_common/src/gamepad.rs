//! Gamepad buttons, axes and snapshots.
//!
//! The button bit order matches the runtime's original wire format
//! (17 buttons, bit 0 = `button_a`). Control ids are resolved through
//! [`GamepadControl::from_str`] against a closed table, never by runtime
//! attribute lookup.

use bitflags::bitflags;
use core::fmt;
use core::str::FromStr;

use crate::consts::GAMEPAD_AXIS_COUNT;
use crate::value::Value;

bitflags! {
    /// Set of pressed gamepad buttons.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GamepadButtons: u32 {
        /// A button.
        const BUTTON_A = 1 << 0;
        /// B button.
        const BUTTON_B = 1 << 1;
        /// X button.
        const BUTTON_X = 1 << 2;
        /// Y button.
        const BUTTON_Y = 1 << 3;
        /// Left bumper.
        const L_BUMPER = 1 << 4;
        /// Right bumper.
        const R_BUMPER = 1 << 5;
        /// Left trigger (digital).
        const L_TRIGGER = 1 << 6;
        /// Right trigger (digital).
        const R_TRIGGER = 1 << 7;
        /// Back / select.
        const BUTTON_BACK = 1 << 8;
        /// Start.
        const BUTTON_START = 1 << 9;
        /// Left stick click.
        const L_STICK = 1 << 10;
        /// Right stick click.
        const R_STICK = 1 << 11;
        /// D-pad up.
        const DPAD_UP = 1 << 12;
        /// D-pad down.
        const DPAD_DOWN = 1 << 13;
        /// D-pad left.
        const DPAD_LEFT = 1 << 14;
        /// D-pad right.
        const DPAD_RIGHT = 1 << 15;
        /// Guide / home.
        const BUTTON_XBOX = 1 << 16;
    }
}

/// Control id of every button, in bit order.
pub const BUTTON_NAMES: [(&str, GamepadButtons); 17] = [
    ("button_a", GamepadButtons::BUTTON_A),
    ("button_b", GamepadButtons::BUTTON_B),
    ("button_x", GamepadButtons::BUTTON_X),
    ("button_y", GamepadButtons::BUTTON_Y),
    ("l_bumper", GamepadButtons::L_BUMPER),
    ("r_bumper", GamepadButtons::R_BUMPER),
    ("l_trigger", GamepadButtons::L_TRIGGER),
    ("r_trigger", GamepadButtons::R_TRIGGER),
    ("button_back", GamepadButtons::BUTTON_BACK),
    ("button_start", GamepadButtons::BUTTON_START),
    ("l_stick", GamepadButtons::L_STICK),
    ("r_stick", GamepadButtons::R_STICK),
    ("dpad_up", GamepadButtons::DPAD_UP),
    ("dpad_down", GamepadButtons::DPAD_DOWN),
    ("dpad_left", GamepadButtons::DPAD_LEFT),
    ("dpad_right", GamepadButtons::DPAD_RIGHT),
    ("button_xbox", GamepadButtons::BUTTON_XBOX),
];

/// Joystick axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GamepadAxis {
    /// Left stick, horizontal.
    JoystickLeftX = 0,
    /// Left stick, vertical.
    JoystickLeftY = 1,
    /// Right stick, horizontal.
    JoystickRightX = 2,
    /// Right stick, vertical.
    JoystickRightY = 3,
}

impl GamepadAxis {
    /// Every axis, in storage order.
    pub const ALL: [GamepadAxis; GAMEPAD_AXIS_COUNT] = [
        Self::JoystickLeftX,
        Self::JoystickLeftY,
        Self::JoystickRightX,
        Self::JoystickRightY,
    ];

    /// Control id of this axis.
    pub const fn name(self) -> &'static str {
        match self {
            Self::JoystickLeftX => "joystick_left_x",
            Self::JoystickLeftY => "joystick_left_y",
            Self::JoystickRightX => "joystick_right_x",
            Self::JoystickRightY => "joystick_right_y",
        }
    }

    /// Index into the axis array.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A single gamepad input addressed by control id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamepadControl {
    /// One button; the flag has exactly one bit set.
    Button(GamepadButtons),
    /// One joystick axis.
    Axis(GamepadAxis),
}

impl GamepadControl {
    /// Control id string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Button(flag) => BUTTON_NAMES
                .iter()
                .find(|(_, f)| f == flag)
                .map(|(name, _)| *name)
                .unwrap_or("unknown_button"),
            Self::Axis(axis) => axis.name(),
        }
    }
}

impl FromStr for GamepadControl {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((_, flag)) = BUTTON_NAMES.iter().find(|(name, _)| *name == s) {
            return Ok(Self::Button(*flag));
        }
        GamepadAxis::ALL
            .iter()
            .find(|axis| axis.name() == s)
            .map(|axis| Self::Axis(*axis))
            .ok_or_else(|| format!("unknown gamepad control: {s:?}"))
    }
}

impl fmt::Display for GamepadControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One complete poll cycle of gamepad state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GamepadSnapshot {
    /// Pressed buttons.
    pub buttons: GamepadButtons,
    /// Axis positions in `[-1.0, 1.0]`, indexed by [`GamepadAxis::index`].
    pub axes: [f32; GAMEPAD_AXIS_COUNT],
    /// Poll cycle counter; increases by one per published sample.
    pub sequence: u64,
    /// Whether a physical gamepad is attached.
    pub connected: bool,
}

impl GamepadSnapshot {
    /// Whether every button in `buttons` is pressed.
    #[inline]
    pub fn is_pressed(&self, buttons: GamepadButtons) -> bool {
        self.buttons.contains(buttons)
    }

    /// Position of one axis.
    #[inline]
    pub fn axis(&self, axis: GamepadAxis) -> f32 {
        self.axes[axis.index()]
    }

    /// Value of a control: `Bool` for buttons, `Float` for axes.
    pub fn value(&self, control: GamepadControl) -> Value {
        match control {
            GamepadControl::Button(flag) => Value::Bool(self.is_pressed(flag)),
            GamepadControl::Axis(axis) => Value::Float(self.axis(axis)),
        }
    }
}
