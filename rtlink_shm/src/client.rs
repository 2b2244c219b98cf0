//! Client get/set surface
//!
//! Hot path: one linear slot scan for id lookups (skip it by keeping a
//! [`DeviceHandle`]), one pinned slot, one versioned read or write. Nothing
//! here allocates or blocks; contention surfaces as a typed error once the
//! configured retry budget is spent.
//!
//! A write section left open by a process that died inside it is closed by
//! the next accessor that runs out of budget on it.

use crate::error::{ShmError, ShmResult};
use crate::platform::is_process_alive;
use crate::region::RegionHandle;
use crate::table::{DeviceHandle, SlotRef};
use crate::version::VersionCounter;
use rtlink_common::device::{DeviceStatus, ParamSpec, short_name};
use rtlink_common::value::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

impl RegionHandle {
    /// Read a parameter of a connected device.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if the device is absent or removed
    /// - `DeviceDisconnected` if the device is stale
    /// - `ParameterNotFound` if the schema has no such parameter
    /// - `ReadContention` if no stable snapshot was seen within budget
    pub fn get_value(&self, device_id: &str, parameter: &str) -> ShmResult<Value> {
        let handle = self.device(device_id)?;
        self.get(&handle, parameter)
    }

    /// Write a command parameter of a connected device.
    ///
    /// Synchronous: the value is visible to every reader when this returns.
    ///
    /// # Errors
    ///
    /// As [`get_value`](Self::get_value), plus `TypeMismatch`,
    /// `ReadOnlyParameter` and `WriteContention`.
    pub fn set_value(&self, device_id: &str, parameter: &str, value: Value) -> ShmResult<()> {
        let handle = self.device(device_id)?;
        self.set(&handle, parameter, value)
    }

    /// [`get_value`](Self::get_value) through a resolved handle
    pub fn get(&self, handle: &DeviceHandle, parameter: &str) -> ShmResult<Value> {
        self.ensure_live()?;
        let pinned = self.pin_connected(handle)?;
        let (index, spec) = lookup(handle, parameter)?;
        let value = self.read_param(&pinned, index, spec)?;
        if !pinned.still_current() {
            return Err(ShmError::DeviceNotFound {
                device_id: handle.device_id.clone(),
            });
        }
        Ok(value)
    }

    /// [`set_value`](Self::set_value) through a resolved handle
    pub fn set(&self, handle: &DeviceHandle, parameter: &str, value: Value) -> ShmResult<()> {
        self.ensure_live()?;
        let pinned = self.pin_connected(handle)?;
        let (index, spec) = lookup(handle, parameter)?;
        if !spec.accepts(&value) {
            return Err(ShmError::TypeMismatch {
                parameter: short_name(parameter),
                expected: spec.ty,
                actual: value.param_type(),
            });
        }
        if !spec.is_writable() {
            return Err(ShmError::ReadOnlyParameter {
                parameter: short_name(parameter),
            });
        }
        self.write_param(&pinned, index, value)?;

        pinned.slot.dirty.fetch_or(1 << index, Ordering::AcqRel);
        self.header()
            .pending_devices
            .fetch_or(1u64 << handle.slot, Ordering::AcqRel);
        Ok(())
    }

    fn pin_connected(&self, handle: &DeviceHandle) -> ShmResult<SlotRef<'_>> {
        let pinned = self.pin(handle)?;
        if self.effective_status(pinned.slot, pinned.status) == DeviceStatus::Stale {
            return Err(ShmError::DeviceDisconnected {
                device_id: handle.device_id.clone(),
            });
        }
        Ok(pinned)
    }

    pub(crate) fn read_param(&self, pinned: &SlotRef<'_>, index: usize, spec: &ParamSpec) -> ShmResult<Value> {
        let block = &pinned.slot.params[index];
        let budget = self.config().read_retry_budget;
        let attempt = || block.version.read(budget, || block.value.load(Ordering::Relaxed));
        let snapshot = attempt().or_else(|| {
            self.close_abandoned_write(&block.version, &block.writer_pid)
                .then(attempt)
                .flatten()
        });
        match snapshot {
            Some((bits, _)) => Ok(Value::from_bits(spec.ty, bits)),
            None => Err(self.note_read_contention(budget)),
        }
    }

    pub(crate) fn write_param(&self, pinned: &SlotRef<'_>, index: usize, value: Value) -> ShmResult<()> {
        let block = &pinned.slot.params[index];
        let budget = self.config().write_retry_budget;
        let odd = self
            .begin_write_section(&block.version, &block.writer_pid, budget)
            .ok_or(ShmError::WriteContention { attempts: budget })?;
        block.value.store(value.to_bits(), Ordering::Relaxed);
        self.end_write_section(&block.version, &block.writer_pid, odd);
        Ok(())
    }

    /// Enter a write section and record this process as its writer.
    pub(crate) fn begin_write_section(
        &self,
        version: &VersionCounter,
        writer_pid: &AtomicU32,
        budget: u32,
    ) -> Option<u64> {
        let odd = version.begin_write(budget).or_else(|| {
            self.close_abandoned_write(version, writer_pid)
                .then(|| version.begin_write(budget))
                .flatten()
        })?;
        writer_pid.store(self.pid(), Ordering::Release);
        Some(odd)
    }

    /// Leave a section entered with [`begin_write_section`](Self::begin_write_section).
    pub(crate) fn end_write_section(&self, version: &VersionCounter, writer_pid: &AtomicU32, odd: u64) {
        writer_pid.store(0, Ordering::Release);
        version.end_write(odd);
    }

    /// Close the open write section if its writer process is gone.
    ///
    /// A writer that died before recording its pid cannot be told apart
    /// from one about to record it, so that section stays open.
    pub(crate) fn close_abandoned_write(&self, version: &VersionCounter, writer_pid: &AtomicU32) -> bool {
        let odd = version.load();
        if !VersionCounter::is_writing(odd) {
            return false;
        }
        let holder = writer_pid.load(Ordering::Acquire);
        if holder == 0 || holder == self.pid() || is_process_alive(holder) {
            return false;
        }
        if writer_pid
            .compare_exchange(holder, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let closed = version.abandon_write(odd);
        if closed {
            warn!(region = %self.name(), holder, version = odd, "closed write section of dead process");
        }
        closed
    }
}

fn lookup(handle: &DeviceHandle, parameter: &str) -> ShmResult<(usize, &'static ParamSpec)> {
    handle
        .device_type
        .param(parameter)
        .ok_or_else(|| ShmError::ParameterNotFound {
            device_id: handle.device_id.clone(),
            parameter: short_name(parameter),
        })
}

#[cfg(test)]
mod tests {
    use crate::error::ShmError;
    use crate::region::RegionOwner;
    use rtlink_common::device::DeviceType;
    use rtlink_common::value::Value;
    use std::sync::atomic::Ordering;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_defaults_visible_after_add() {
        let dir = tempfile::tempdir().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "defaults", 2).unwrap();
        owner.add_device("m", DeviceType::MotorController).unwrap();

        assert_eq!(owner.get_value("m", "speed").unwrap(), Value::Float(0.0));
        assert_eq!(owner.get_value("m", "deadband").unwrap(), Value::Float(0.05));
        assert_eq!(owner.get_value("m", "invert").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_set_marks_pending() {
        let dir = tempfile::tempdir().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "pending", 2).unwrap();
        owner.add_device("s", DeviceType::ServoControl).unwrap();
        let m = owner.add_device("m", DeviceType::MotorController).unwrap();

        owner.set_value("m", "invert", Value::Bool(true)).unwrap();
        assert_eq!(owner.pending_devices(), 1 << m.slot());
        assert_eq!(owner.take_pending_devices(), 1 << m.slot());
        assert_eq!(owner.pending_devices(), 0);
        let mask = owner.take_pending_commands(&m).unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1]);
        assert!(owner.take_pending_commands(&m).unwrap().is_empty());
    }

    #[test]
    fn test_read_only_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "ro", 1).unwrap();
        let enc = owner.add_device("e", DeviceType::Encoder).unwrap();

        assert!(matches!(
            owner.set_value("e", "rotation", Value::Int(3)),
            Err(ShmError::ReadOnlyParameter { .. })
        ));
        owner.publish_value(&enc, "rotation", Value::Int(3)).unwrap();
        assert_eq!(owner.get_value("e", "rotation").unwrap(), Value::Int(3));
        assert_eq!(owner.pending_devices(), 0);
    }

    #[test]
    fn test_write_section_of_dead_process_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "abandoned", 1).unwrap();
        let m = owner.add_device("m", DeviceType::MotorController).unwrap();
        let dead = dead_pid();

        // One section abandoned under a reader, one under a writer.
        let (speed, _) = DeviceType::MotorController.param("speed").unwrap();
        let (invert, _) = DeviceType::MotorController.param("invert").unwrap();
        let slot = owner.slot(m.slot());
        for index in [speed, invert] {
            slot.params[index].version.try_begin_write().unwrap();
            slot.params[index].writer_pid.store(dead, Ordering::Release);
        }

        assert_eq!(owner.get_value("m", "speed").unwrap(), Value::Float(0.0));
        owner.set_value("m", "invert", Value::Bool(true)).unwrap();
        assert_eq!(owner.get_value("m", "invert").unwrap(), Value::Bool(true));
        for index in [speed, invert] {
            assert!(crate::VersionCounter::is_stable(slot.params[index].version.load()));
            assert_eq!(slot.params[index].writer_pid.load(Ordering::Acquire), 0);
        }
    }

    #[test]
    fn test_write_section_of_live_process_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "busy_param", 1).unwrap();
        let m = owner.add_device("m", DeviceType::MotorController).unwrap();
        let (speed, _) = DeviceType::MotorController.param("speed").unwrap();
        let block = &owner.slot(m.slot()).params[speed];

        let odd = block.version.try_begin_write().unwrap();
        // pid 1 always exists.
        block.writer_pid.store(1, Ordering::Release);
        assert!(matches!(
            owner.get_value("m", "speed"),
            Err(ShmError::ReadContention { .. })
        ));
        assert!(matches!(
            owner.set_value("m", "speed", Value::Float(0.5)),
            Err(ShmError::WriteContention { .. })
        ));

        owner.end_write_section(&block.version, &block.writer_pid, odd);
        owner.set_value("m", "speed", Value::Float(0.5)).unwrap();
        assert_eq!(owner.get_value("m", "speed").unwrap(), Value::Float(0.5));
    }

    #[test]
    fn test_old_handle_reports_missing_device_first() {
        let dir = tempfile::tempdir().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "old_handle", 1).unwrap();
        let m = owner.add_device("m", DeviceType::MotorController).unwrap();
        owner.remove_device("m").unwrap();

        assert!(matches!(
            owner.get(&m, "no_such_param"),
            Err(ShmError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            owner.set(&m, "speed", Value::Bool(true)),
            Err(ShmError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            owner.publish_value(&m, "no_such_param", Value::Int(1)),
            Err(ShmError::DeviceNotFound { .. })
        ));
    }
}
