//! Device handler and its cycle loop.
//!
//! The `DeviceHandler` owns the shared region for its whole lifetime. Each
//! cycle it keeps the region and its devices alive, forwards client commands
//! to the virtual devices and publishes their readings.

use crate::config::DevHandlerConfig;
use crate::error::HandlerError;
use crate::virtual_device::VirtualDevice;
use rtlink_common::cancel::CancellationToken;
use rtlink_common::device::DeviceType;
use rtlink_shm::{RegionOwner, RegionStats};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cycles between periodic statistics logs.
const STATS_LOG_INTERVAL: u64 = 1000;

/// Timing statistics for the cycle loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimingStats {
    /// Number of cycles executed
    pub cycle_count: u64,
    /// Number of cycles that exceeded the target period
    pub timing_violations: u64,
    /// Maximum observed cycle time
    pub max_cycle_time_us: u64,
    /// Sum of cycle times for average calculation
    pub total_cycle_time_us: u64,
}

impl TimingStats {
    /// Mean cycle time, zero before the first cycle.
    pub fn avg_cycle_time_us(&self) -> u64 {
        self.total_cycle_time_us.checked_div(self.cycle_count).unwrap_or(0)
    }
}

/// Owner of the region and driver of the virtual devices.
pub struct DeviceHandler {
    config: DevHandlerConfig,
    region: RegionOwner,
    devices: Vec<VirtualDevice>,
    cycle_time: Duration,
    stats: TimingStats,
    last_liveness: Instant,
}

impl DeviceHandler {
    /// Validate `config`, create the region and install the configured devices.
    ///
    /// # Errors
    ///
    /// Returns `Config` on invalid configuration and `Shm` if the region
    /// cannot be created (for example because a live owner already exists).
    pub fn new(config: DevHandlerConfig) -> Result<Self, HandlerError> {
        config.validate()?;
        let region = RegionOwner::create(&config.region)?;
        info!(
            region = region.name(),
            capacity = region.capacity(),
            cycle_time_us = config.cycle_time_us,
            "device handler created"
        );

        let mut handler = Self {
            cycle_time: config.cycle_time(),
            devices: Vec::with_capacity(config.devices.len()),
            region,
            config,
            stats: TimingStats::default(),
            last_liveness: Instant::now(),
        };
        for entry in handler.config.devices.clone() {
            handler.connect_device(&entry.id, entry.device_type)?;
        }
        Ok(handler)
    }

    /// Region owned by this handler.
    pub fn region(&self) -> &RegionOwner {
        &self.region
    }

    /// Devices currently driven.
    pub fn devices(&self) -> &[VirtualDevice] {
        &self.devices
    }

    /// Timing statistics so far.
    pub fn stats(&self) -> TimingStats {
        self.stats
    }

    /// Add a device to the table and start driving it.
    pub fn connect_device(&mut self, device_id: &str, device_type: DeviceType) -> Result<(), HandlerError> {
        let handle = self.region.add_device(device_id, device_type)?;
        self.devices.push(VirtualDevice::new(handle));
        Ok(())
    }

    /// Stop driving a device and remove it from the table.
    pub fn disconnect_device(&mut self, device_id: &str) -> Result<(), HandlerError> {
        let index = self
            .devices
            .iter()
            .position(|d| d.handle().device_id() == device_id)
            .ok_or_else(|| HandlerError::UnknownDevice(device_id.to_string()))?;
        self.region.remove_device(device_id)?;
        self.devices.swap_remove(index);
        Ok(())
    }

    /// Run one cycle.
    ///
    /// Device-level failures are logged and skipped; anything else is
    /// returned.
    pub fn cycle(&mut self, dt: Duration) -> Result<(), HandlerError> {
        if self.last_liveness.elapsed() >= self.config.region.liveness_interval() {
            self.region.refresh_liveness();
            self.last_liveness = Instant::now();
        }

        for device in &self.devices {
            skip_device_level(self.region.touch_device(device.handle()))?;
        }

        let pending = self.region.take_pending_devices();
        if pending != 0 {
            for device in &mut self.devices {
                if pending & (1u64 << device.handle().slot()) == 0 {
                    continue;
                }
                let mask = match self.region.take_pending_commands(device.handle()) {
                    Ok(mask) => mask,
                    Err(e) if e.is_device_level() => {
                        debug!(error = %e, "pending commands skipped");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                skip_device_level(device.apply_commands(&self.region, mask))?;
            }
        }

        for device in &mut self.devices {
            skip_device_level(device.step(&self.region, dt))?;
        }

        let swept = self
            .region
            .sweep_stale_devices(self.region.device_timeout());
        if swept > 0 {
            warn!(swept, "devices marked stale");
        }
        Ok(())
    }

    /// Run cycles until `cancel` fires or a region-level error occurs.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<(), HandlerError> {
        info!(
            cycle_time_us = self.cycle_time.as_micros() as u64,
            devices = self.devices.len(),
            rt = detect_rt_mode(),
            "starting cycle loop"
        );

        let mut last_cycle = Instant::now();
        while !cancel.is_cancelled() {
            let cycle_start = Instant::now();
            let dt = cycle_start.duration_since(last_cycle);
            last_cycle = cycle_start;

            if let Err(e) = self.cycle(dt) {
                error!(error = %e, "cycle failed");
                return Err(e);
            }
            self.record_cycle(cycle_start.elapsed());

            let elapsed = cycle_start.elapsed();
            if elapsed < self.cycle_time {
                cancel.sleep(self.cycle_time - elapsed);
            }
        }

        info!(
            cycles = self.stats.cycle_count,
            violations = self.stats.timing_violations,
            "cycle loop stopped"
        );
        Ok(())
    }

    fn record_cycle(&mut self, took: Duration) {
        let cycle_time_us = took.as_micros() as u64;
        self.stats.cycle_count += 1;
        self.stats.total_cycle_time_us += cycle_time_us;
        self.stats.max_cycle_time_us = self.stats.max_cycle_time_us.max(cycle_time_us);

        if cycle_time_us > self.config.cycle_time_us {
            self.stats.timing_violations += 1;
            if self.stats.timing_violations <= 10 || self.stats.timing_violations % 1000 == 0 {
                warn!(
                    violation = self.stats.timing_violations,
                    took_us = cycle_time_us,
                    target_us = self.config.cycle_time_us,
                    "cycle overran"
                );
            }
        }

        if self.stats.cycle_count % STATS_LOG_INTERVAL == 0 {
            let region: RegionStats = self.region.stats();
            debug!(
                cycles = self.stats.cycle_count,
                avg_us = self.stats.avg_cycle_time_us(),
                max_us = self.stats.max_cycle_time_us,
                connected = region.connected,
                stale = region.stale,
                read_contention = region.read_contention,
                "cycle stats"
            );
        }
    }

    /// Destroy the region. Dropping the handler does the same.
    pub fn shutdown(mut self) -> Result<(), HandlerError> {
        info!("shutdown requested");
        debug!("final table state:\n{}", self.region.dump());
        self.region.destroy()?;
        Ok(())
    }
}

fn skip_device_level<T>(result: rtlink_shm::ShmResult<T>) -> Result<(), HandlerError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_device_level() => {
            debug!(error = %e, "device skipped this cycle");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether the process runs under a real-time scheduling policy.
fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        // SAFETY: sched_getscheduler(0) only queries the calling process.
        let policy = unsafe { sched_getscheduler(0) };
        policy == SCHED_FIFO || policy == SCHED_RR
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
