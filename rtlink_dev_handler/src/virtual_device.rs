//! Virtual devices.
//!
//! Software stand-ins for the physical devices the handler would normally
//! drive: they take client commands from the region and publish sensor
//! readings back. Sensors of passive types (switches, potentiometers, line
//! followers, encoders) keep whatever was last published, so tests and
//! tooling can inject readings through [`RegionOwner::publish_value`].

use rtlink_common::consts::MAX_PARAMS;
use rtlink_common::device::DeviceType;
use rtlink_common::value::Value;
use rtlink_shm::{DeviceHandle, ParamMask, RegionOwner, ShmResult};
use std::time::Duration;
use tracing::{debug, trace};

/// Encoder counts per second at full motor output.
pub const MOTOR_COUNTS_PER_SEC: f64 = 1_000.0;

/// `doubling` restarts at 1.0 once it passes this.
const DOUBLING_LIMIT: f32 = 1.0e6;

#[derive(Debug, Clone, PartialEq)]
enum Model {
    /// Sensors only change when something publishes them.
    Passive,
    /// Self-updating counters for end-to-end checks.
    TestDevice {
        increasing: i32,
        doubling: f32,
        flip_flop: bool,
    },
    /// Open-loop motor integrating commanded output into encoder counts.
    Motor { position: f64 },
}

/// One virtual device bound to its table slot.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    handle: DeviceHandle,
    commands: [Value; MAX_PARAMS],
    model: Model,
}

impl VirtualDevice {
    /// Device starting from schema defaults.
    pub fn new(handle: DeviceHandle) -> Self {
        let mut commands = [Value::Int(0); MAX_PARAMS];
        for (slot, spec) in commands.iter_mut().zip(handle.device_type().schema()) {
            *slot = spec.default;
        }
        let model = match handle.device_type() {
            DeviceType::SimpleTestDevice => Model::TestDevice {
                increasing: 0,
                doubling: 1.0,
                flip_flop: false,
            },
            DeviceType::MotorController => Model::Motor { position: 0.0 },
            _ => Model::Passive,
        };
        Self {
            handle,
            commands,
            model,
        }
    }

    /// Table handle of this device.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Last command value taken from the region for `parameter`.
    pub fn command(&self, parameter: &str) -> Option<Value> {
        let (index, spec) = self.handle.device_type().param(parameter)?;
        spec.is_writable().then_some(self.commands[index])
    }

    /// Pull the parameters flagged in `mask` out of the region.
    ///
    /// Returns how many commands changed. On error the commands not yet
    /// read are flagged pending again, so the next cycle retries them.
    pub fn apply_commands(&mut self, region: &RegionOwner, mask: ParamMask) -> ShmResult<usize> {
        let schema = self.handle.device_type().schema();
        let mut changed = 0;
        let mut unread = mask;
        for index in mask.iter() {
            let Some(spec) = schema.get(index) else {
                unread.0 &= !(1 << index);
                continue;
            };
            let value = match region.get(&self.handle, spec.name) {
                Ok(value) => value,
                Err(e) => {
                    if let Err(requeue) = region.requeue_pending_commands(&self.handle, unread) {
                        debug!(device_id = self.handle.device_id(), error = %requeue, "commands dropped");
                    }
                    return Err(e);
                }
            };
            unread.0 &= !(1 << index);
            if value != self.commands[index] {
                debug!(
                    device_id = self.handle.device_id(),
                    parameter = spec.name,
                    ?value,
                    "command applied"
                );
                self.commands[index] = value;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Advance the model by `dt` and publish its sensor readings.
    pub fn step(&mut self, region: &RegionOwner, dt: Duration) -> ShmResult<()> {
        match &mut self.model {
            Model::Passive => Ok(()),
            Model::TestDevice {
                increasing,
                doubling,
                flip_flop,
            } => {
                *increasing = increasing.wrapping_add(1);
                *doubling *= 2.0;
                if *doubling > DOUBLING_LIMIT {
                    *doubling = 1.0;
                }
                *flip_flop = !*flip_flop;
                let (i, d, f) = (*increasing, *doubling, *flip_flop);
                region.publish_value(&self.handle, "increasing", Value::Int(i))?;
                region.publish_value(&self.handle, "doubling", Value::Float(d))?;
                region.publish_value(&self.handle, "flip_flop", Value::Bool(f))
            }
            Model::Motor { position } => {
                let output = motor_output(&self.commands);
                let velocity = f64::from(output) * MOTOR_COUNTS_PER_SEC;
                *position += velocity * dt.as_secs_f64();
                let counts = position.round() as i32;
                trace!(device_id = self.handle.device_id(), output, counts, "motor step");
                region.publish_value(&self.handle, "velocity", Value::Float(velocity as f32))?;
                region.publish_value(&self.handle, "enc_pos", Value::Int(counts))
            }
        }
    }
}

/// Effective motor output in `[-1, 1]` from the speed, invert and deadband commands.
fn motor_output(commands: &[Value; MAX_PARAMS]) -> f32 {
    let speed = commands[0].as_float().unwrap_or(0.0).clamp(-1.0, 1.0);
    let invert = commands[1].as_bool().unwrap_or(false);
    let deadband = commands[2].as_float().unwrap_or(0.0).abs();
    let output = if speed.abs() < deadband { 0.0 } else { speed };
    if invert { -output } else { output }
}
