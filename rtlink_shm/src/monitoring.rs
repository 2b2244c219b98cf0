//! Region statistics for periodic health logging, and a readable dump of
//! the whole table for diagnostics

use crate::region::RegionHandle;
use rtlink_common::device::{DeviceStatus, RunMode};
use std::fmt;
use std::sync::atomic::Ordering;

/// Point-in-time view of the region header and slot states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionStats {
    /// Mapped capacity
    pub capacity: usize,
    /// Devices connected and refreshed
    pub connected: usize,
    /// Devices past their refresh timeout
    pub stale: usize,
    /// Removed devices still occupying a slot
    pub disconnected: usize,
    /// Owner heartbeat counter
    pub heartbeat: u64,
    /// Structural change counter
    pub table_epoch: u64,
    /// Failed versioned reads across all clients
    pub read_contention: u64,
    /// Slots with pending client commands
    pub pending_devices: u32,
    /// Robot run mode
    pub run_mode: RunMode,
}

impl RegionStats {
    /// Devices counted as present (connected or stale)
    pub fn present(&self) -> usize {
        self.connected + self.stale
    }
}

impl RegionHandle {
    /// Collect statistics without taking any lock
    pub fn stats(&self) -> RegionStats {
        let header = self.header();
        let mut stats = RegionStats {
            capacity: self.capacity(),
            heartbeat: header.heartbeat.load(Ordering::Relaxed),
            table_epoch: header.table_epoch.load(Ordering::Relaxed),
            read_contention: header.read_contention.load(Ordering::Relaxed),
            pending_devices: header.pending_devices.load(Ordering::Relaxed).count_ones(),
            run_mode: self.get_run_mode(),
            ..RegionStats::default()
        };
        for index in 0..self.capacity() {
            let slot = self.slot(index);
            let status = DeviceStatus::from_raw(slot.status.load(Ordering::Relaxed))
                .map(|stored| self.effective_status(slot, stored));
            match status {
                Some(DeviceStatus::Connected) => stats.connected += 1,
                Some(DeviceStatus::Stale) => stats.stale += 1,
                Some(DeviceStatus::Disconnected) => stats.disconnected += 1,
                _ => {}
            }
        }
        stats
    }

    /// Displayable dump of the header, every listed device with its
    /// parameter values, and the gamepad buffer
    pub fn dump(&self) -> RegionDump<'_> {
        RegionDump { region: self }
    }
}

/// Returned by [`RegionHandle::dump`]
pub struct RegionDump<'a> {
    region: &'a RegionHandle,
}

impl fmt::Display for RegionDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let region = self.region;
        let header = region.header();
        writeln!(
            f,
            "region {} owner={} capacity={} devices={} mode={} heartbeat={}",
            region.name(),
            header.owner_pid.load(Ordering::Relaxed),
            region.capacity(),
            header.device_count.load(Ordering::Relaxed),
            region.get_run_mode(),
            header.heartbeat.load(Ordering::Relaxed),
        )?;

        for device in region.list_devices() {
            writeln!(
                f,
                "  [{:2}] {:<20} {:<18} {}",
                device.slot, device.device_id, device.device_type, device.status
            )?;
            if !device.status.is_present() {
                continue;
            }
            let Ok(handle) = region.device(&device.device_id) else {
                continue;
            };
            // Stale devices still pin, so their last values show up too.
            let Ok(pinned) = region.pin(&handle) else {
                continue;
            };
            for (index, spec) in handle.device_type().schema().iter().enumerate() {
                let access = if spec.is_writable() { "rw" } else { "ro" };
                match region.read_param(&pinned, index, spec) {
                    Ok(value) => writeln!(f, "         {:<14} {access} {value}", spec.name)?,
                    Err(e) => writeln!(f, "         {:<14} {access} <{e}>", spec.name)?,
                }
            }
        }

        match region.gamepad_snapshot() {
            Ok(pad) if pad.connected => writeln!(
                f,
                "  gamepad seq={} buttons={:#07x} axes={:?}",
                pad.sequence,
                pad.buttons.bits(),
                pad.axes
            ),
            Ok(pad) => writeln!(f, "  gamepad seq={} disconnected", pad.sequence),
            Err(e) => writeln!(f, "  gamepad <{e}>"),
        }
    }
}
