//! Gamepad state buffer, poller and button watcher
//!
//! One poller process writes whole snapshots; any number of readers see
//! either the previous or the next cycle, never a mix of both.

use crate::error::{ShmError, ShmResult};
use crate::region::RegionHandle;
use rtlink_common::cancel::CancellationToken;
use rtlink_common::config::GamepadConfig;
use rtlink_common::consts::{GAMEPAD_AXIS_COUNT, MAX_GAMEPAD_POLL_HZ, MIN_GAMEPAD_POLL_HZ};
use rtlink_common::device::{DeviceId, short_name};
use rtlink_common::gamepad::{GamepadButtons, GamepadControl, GamepadSnapshot};
use rtlink_common::value::Value;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Device id reported in gamepad errors.
const GAMEPAD_ID: &str = "gamepad";

/// Interval at which [`ButtonWatcher`] re-reads the buffer.
const WATCH_INTERVAL: Duration = Duration::from_millis(5);

/// One raw reading from the physical pad
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GamepadSample {
    /// Pressed buttons
    pub buttons: GamepadButtons,
    /// Axis positions in `[-1.0, 1.0]`
    pub axes: [f32; GAMEPAD_AXIS_COUNT],
}

/// Source of gamepad readings
pub trait GamepadSource {
    /// Read the pad; `None` while no pad is attached.
    fn sample(&mut self) -> Option<GamepadSample>;
}

impl<F: FnMut() -> Option<GamepadSample>> GamepadSource for F {
    fn sample(&mut self) -> Option<GamepadSample> {
        self()
    }
}

fn gamepad_id() -> DeviceId {
    let mut id = DeviceId::new();
    let _ = id.push_str(GAMEPAD_ID);
    id
}

impl RegionHandle {
    /// Publish one poll cycle. `None` marks the pad disconnected.
    ///
    /// Returns the new sequence number.
    pub fn publish_gamepad(&self, sample: Option<&GamepadSample>) -> ShmResult<u64> {
        self.ensure_live()?;
        let block = self.gamepad_block();
        let budget = self.config().write_retry_budget;
        let odd = self
            .begin_write_section(&block.version, &block.writer_pid, budget)
            .ok_or(ShmError::WriteContention { attempts: budget })?;

        let sequence = block.sequence.load(Ordering::Relaxed) + 1;
        let (buttons, axes, connected) = match sample {
            Some(s) => (s.buttons.bits(), s.axes, 1),
            None => (0, [0.0; GAMEPAD_AXIS_COUNT], 0),
        };
        block.sequence.store(sequence, Ordering::Relaxed);
        block.buttons.store(buttons, Ordering::Relaxed);
        block.connected.store(connected, Ordering::Relaxed);
        for (slot, value) in block.axes.iter().zip(axes) {
            slot.store(value.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
        }

        self.end_write_section(&block.version, &block.writer_pid, odd);
        Ok(sequence)
    }

    /// Consistent copy of the latest poll cycle
    pub fn gamepad_snapshot(&self) -> ShmResult<GamepadSnapshot> {
        self.ensure_live()?;
        let block = self.gamepad_block();
        let budget = self.config().read_retry_budget;
        let attempt = || block.version.read(budget, || {
            let mut axes = [0.0f32; GAMEPAD_AXIS_COUNT];
            for (dst, src) in axes.iter_mut().zip(&block.axes) {
                *dst = f32::from_bits(src.load(Ordering::Relaxed));
            }
            GamepadSnapshot {
                buttons: GamepadButtons::from_bits_truncate(block.buttons.load(Ordering::Relaxed)),
                axes,
                sequence: block.sequence.load(Ordering::Relaxed),
                connected: block.connected.load(Ordering::Relaxed) != 0,
            }
        });
        let read = attempt().or_else(|| {
            self.close_abandoned_write(&block.version, &block.writer_pid)
                .then(attempt)
                .flatten()
        });
        match read {
            Some((snapshot, _)) => Ok(snapshot),
            None => Err(self.note_read_contention(budget)),
        }
    }

    /// Value of one control: `Bool` for buttons, `Float` for axes.
    ///
    /// # Errors
    ///
    /// - `ParameterNotFound` for an unknown control id
    /// - `DeviceDisconnected` while no pad is attached
    pub fn get_control(&self, control_id: &str) -> ShmResult<Value> {
        let control: GamepadControl =
            control_id
                .parse()
                .map_err(|_| ShmError::ParameterNotFound {
                    device_id: gamepad_id(),
                    parameter: short_name(control_id),
                })?;
        let snapshot = self.gamepad_snapshot()?;
        if !snapshot.connected {
            return Err(ShmError::DeviceDisconnected {
                device_id: gamepad_id(),
            });
        }
        Ok(snapshot.value(control))
    }
}

/// Fixed-rate sampler writing into the gamepad buffer
pub struct GamepadPoller<S> {
    source: S,
    interval: Duration,
    connected: bool,
}

impl<S: GamepadSource> GamepadPoller<S> {
    /// Poller at `config.poll_hz`, clamped to the supported window
    pub fn new(source: S, config: &GamepadConfig) -> Self {
        let clamped = config.poll_hz.clamp(MIN_GAMEPAD_POLL_HZ, MAX_GAMEPAD_POLL_HZ);
        if clamped != config.poll_hz {
            warn!(requested = config.poll_hz, used = clamped, "gamepad poll rate clamped");
        }
        let config = GamepadConfig { poll_hz: clamped };
        Self {
            source,
            interval: config.poll_interval(),
            connected: false,
        }
    }

    /// Interval between samples
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sample once and publish. Returns the new sequence number.
    pub fn poll_once(&mut self, region: &RegionHandle) -> ShmResult<u64> {
        let sample = self.source.sample();
        let connected = sample.is_some();
        if connected != self.connected {
            self.connected = connected;
            if connected {
                info!("gamepad connected");
            } else {
                warn!("gamepad disconnected");
            }
        }
        region.publish_gamepad(sample.as_ref())
    }

    /// Poll until `cancel` fires. Returns the number of cycles published.
    ///
    /// Device-level errors are logged and polling continues; region-level
    /// errors end the loop.
    pub fn run(&mut self, region: &RegionHandle, cancel: &CancellationToken) -> ShmResult<u64> {
        let mut cycles = 0u64;
        let mut next = Instant::now();
        while !cancel.is_cancelled() {
            match self.poll_once(region) {
                Ok(_) => cycles += 1,
                Err(e) if e.is_device_level() => debug!(error = %e, "gamepad publish skipped"),
                Err(e) => return Err(e),
            }
            next += self.interval;
            let now = Instant::now();
            if next > now {
                cancel.sleep(next - now);
            } else {
                // Overran; restart the schedule instead of bursting.
                next = now;
            }
        }
        info!(cycles, "gamepad poller stopped");
        Ok(cycles)
    }
}

/// Button edges between two observed cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Buttons that went down
    pub pressed: GamepadButtons,
    /// Buttons that went up
    pub released: GamepadButtons,
    /// Buttons held after the change
    pub buttons: GamepadButtons,
    /// Sequence of the cycle that showed the change
    pub sequence: u64,
}

/// Blocks until the button set changes
#[derive(Debug, Clone)]
pub struct ButtonWatcher {
    last: GamepadButtons,
}

impl ButtonWatcher {
    /// Watcher starting from the current button set
    pub fn new(region: &RegionHandle) -> ShmResult<Self> {
        let snapshot = region.gamepad_snapshot()?;
        Ok(Self {
            last: snapshot.buttons,
        })
    }

    /// Buttons as of the last reported event
    pub fn buttons(&self) -> GamepadButtons {
        self.last
    }

    /// Wait up to `timeout` for a button change.
    ///
    /// Returns `None` on timeout or cancellation.
    pub fn wait_for_change(
        &mut self,
        region: &RegionHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ShmResult<Option<ButtonEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = region.gamepad_snapshot()?;
            if snapshot.buttons != self.last {
                let event = ButtonEvent {
                    pressed: snapshot.buttons - self.last,
                    released: self.last - snapshot.buttons,
                    buttons: snapshot.buttons,
                    sequence: snapshot.sequence,
                };
                self.last = snapshot.buttons;
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline || cancel.sleep(WATCH_INTERVAL.min(deadline - now)) {
                return Ok(None);
            }
        }
    }
}
