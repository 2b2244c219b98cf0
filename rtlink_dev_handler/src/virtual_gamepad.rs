//! Synthetic gamepad for running without a physical pad.

use rtlink_common::consts::{GAMEPAD_AXIS_COUNT, GAMEPAD_BUTTON_COUNT};
use rtlink_common::gamepad::GamepadButtons;
use rtlink_shm::{GamepadSample, GamepadSource};
use std::time::{Duration, Instant};

/// How long each button stays pressed in the rotation.
const BUTTON_HOLD: Duration = Duration::from_millis(500);
/// Period of one full stick sweep.
const SWEEP_PERIOD: Duration = Duration::from_secs(4);

/// Gamepad that sweeps both sticks and presses one button at a time.
#[derive(Debug, Clone)]
pub struct VirtualGamepad {
    start: Instant,
}

impl VirtualGamepad {
    /// Start the pattern now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Sample the pattern `elapsed` after start.
    pub fn sample_at(elapsed: Duration) -> GamepadSample {
        let phase = (elapsed.as_secs_f64() / SWEEP_PERIOD.as_secs_f64()) * std::f64::consts::TAU;
        let mut axes = [0.0f32; GAMEPAD_AXIS_COUNT];
        for (i, axis) in axes.iter_mut().enumerate() {
            let offset = i as f64 * std::f64::consts::FRAC_PI_2;
            *axis = (phase + offset).sin() as f32;
        }
        let step = (elapsed.as_millis() / BUTTON_HOLD.as_millis()) as usize % GAMEPAD_BUTTON_COUNT;
        GamepadSample {
            buttons: GamepadButtons::from_bits_truncate(1 << step),
            axes,
        }
    }
}

impl Default for VirtualGamepad {
    fn default() -> Self {
        Self::new()
    }
}

impl GamepadSource for VirtualGamepad {
    fn sample(&mut self) -> Option<GamepadSample> {
        Some(Self::sample_at(self.start.elapsed()))
    }
}
