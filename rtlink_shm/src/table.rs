//! Device table: slots, handles, structural operations
//!
//! Every accessor pins a slot in its process's pin word before checking
//! status and generation, and unpins on the way out. Removal only flips the
//! status; a later `add_device` reuses the slot only after observing no pin
//! held by a live process. Both sides use `SeqCst`, so an accessor that pins
//! after that check is guaranteed to see the slot as gone. Pins left behind
//! by a process that died inside an accessor are released at that check.
//!
//! A connected device whose refresh marker is older than the window the
//! owner published counts as stale to every reader, whether or not the
//! owner got around to sweeping it.

use crate::error::{ShmError, ShmResult};
use crate::layout::{DeviceSlot, ID_WORDS, pack_id, pin_count, pin_holder, pin_word, unpack_id};
use crate::platform::{is_process_alive, now_ms};
use crate::region::{RegionHandle, RegionOwner};
use rtlink_common::consts::DEVICE_ID_LEN;
use rtlink_common::device::{DeviceId, DeviceStatus, DeviceType, parse_device_id, short_name};
use rtlink_common::value::Value;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Validated reference to one device instance
///
/// Obtained from [`RegionOwner::add_device`] or [`RegionHandle::device`].
/// Revalidated on every use; once the device is removed the handle fails
/// with `DeviceNotFound` for good, even if a device with the same id is
/// added again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub(crate) device_id: DeviceId,
    pub(crate) device_type: DeviceType,
}

impl DeviceHandle {
    /// Device id
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Device type
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Slot index in the table
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// One entry of [`RegionHandle::list_devices`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Device id
    pub device_id: DeviceId,
    /// Device type
    pub device_type: DeviceType,
    /// Status when the slot was visited
    pub status: DeviceStatus,
    /// Slot index
    pub slot: usize,
}

/// Set of parameter indices, in schema order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamMask(
    /// Bit `i` set for parameter index `i`
    pub u32,
);

impl ParamMask {
    /// No parameters
    pub const EMPTY: Self = Self(0);

    /// Whether no bit is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether parameter `index` is set
    pub fn contains(self, index: usize) -> bool {
        index < 32 && self.0 & (1 << index) != 0
    }

    /// Set parameter indices in ascending order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..32).filter(move |i| self.contains(*i))
    }
}

/// Pinned slot; unpins on drop.
pub(crate) struct SlotRef<'a> {
    pub(crate) slot: &'a DeviceSlot,
    pub(crate) status: DeviceStatus,
    generation: u64,
    // Pin word index, `None` when counted in `active_refs`.
    way: Option<usize>,
}

impl SlotRef<'_> {
    /// Whether the slot still holds the pinned instance.
    #[inline]
    pub(crate) fn still_current(&self) -> bool {
        self.slot.generation.load() == self.generation
    }
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        match self.way {
            Some(way) => {
                let word = &self.slot.pins[way];
                let previous = word.fetch_sub(1, Ordering::SeqCst);
                if pin_count(previous) == 1 {
                    // Free the word unless another thread of ours pinned meanwhile.
                    let _ = word.compare_exchange(
                        previous - 1,
                        0,
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    );
                }
            }
            None => {
                self.slot.active_refs.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// Add one pin for `pid`; returns the pin word used.
fn acquire_pin(slot: &DeviceSlot, pid: u32) -> Option<usize> {
    // Our own word first, then a free one.
    for claim_free in [false, true] {
        for (way, word) in slot.pins.iter().enumerate() {
            let mut current = word.load(Ordering::SeqCst);
            loop {
                let next = if current != 0 && pin_holder(current) == pid {
                    current + 1
                } else if claim_free && current == 0 {
                    pin_word(pid, 1)
                } else {
                    break;
                };
                match word.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                    Ok(_) => return Some(way),
                    Err(actual) => current = actual,
                }
            }
        }
    }
    slot.active_refs.fetch_add(1, Ordering::SeqCst);
    None
}

fn status_of(slot: &DeviceSlot, order: Ordering) -> Option<DeviceStatus> {
    DeviceStatus::from_raw(slot.status.load(order))
}

impl RegionHandle {
    /// Pin the instance `handle` refers to.
    ///
    /// Fails with `DeviceNotFound` if it was removed or replaced. A stale
    /// device pins fine; callers decide what stale means for them.
    pub(crate) fn pin(&self, handle: &DeviceHandle) -> ShmResult<SlotRef<'_>> {
        let not_found = || ShmError::DeviceNotFound {
            device_id: handle.device_id.clone(),
        };
        if handle.slot >= self.capacity() {
            return Err(not_found());
        }
        let slot = self.slot(handle.slot);
        let way = acquire_pin(slot, self.pid());
        let status = status_of(slot, Ordering::SeqCst);
        let pinned = SlotRef {
            slot,
            status: status.unwrap_or(DeviceStatus::Free),
            generation: handle.generation,
            way,
        };
        if !pinned.still_current() || !pinned.status.is_present() {
            return Err(not_found());
        }
        Ok(pinned)
    }

    /// `stored`, except that a connected device past the published refresh
    /// window reads as stale.
    pub(crate) fn effective_status(&self, slot: &DeviceSlot, stored: DeviceStatus) -> DeviceStatus {
        if stored == DeviceStatus::Connected {
            let age = now_ms().saturating_sub(slot.last_refresh_ms.load(Ordering::Acquire));
            if age > self.device_timeout_ms() {
                return DeviceStatus::Stale;
            }
        }
        stored
    }

    /// Find the present slot holding `device_id`.
    ///
    /// Returns the slot index, its generation and the raw device type, all
    /// from one consistent identity read.
    fn find_present(&self, device_id: &DeviceId) -> ShmResult<Option<(usize, u64, u32)>> {
        let words = pack_id(device_id);
        let len = device_id.len() as u32;
        let budget = self.config().read_retry_budget;
        for index in 0..self.capacity() {
            let slot = self.slot(index);
            if !status_of(slot, Ordering::Acquire).is_some_and(DeviceStatus::is_present) {
                continue;
            }
            let Some(((slot_len, slot_words, ty), generation)) = slot.generation.read(budget, || {
                (
                    slot.id_len.load(Ordering::Relaxed),
                    slot.load_id(),
                    slot.device_type.load(Ordering::Relaxed),
                )
            }) else {
                return Err(self.note_read_contention(budget));
            };
            if slot_len == len && slot_words == words {
                return Ok(Some((index, generation, ty)));
            }
        }
        Ok(None)
    }

    /// Resolve `device_id` to a handle for repeated access.
    ///
    /// # Errors
    ///
    /// - `InvalidDeviceId` if the id is empty or too long
    /// - `DeviceNotFound` if no present device has this id
    pub fn device(&self, device_id: &str) -> ShmResult<DeviceHandle> {
        self.ensure_live()?;
        let device_id = parse_device_id(device_id)?;
        let Some((slot, generation, ty)) = self.find_present(&device_id)? else {
            return Err(ShmError::DeviceNotFound { device_id });
        };
        let Some(device_type) = DeviceType::from_u16(ty as u16) else {
            return Err(ShmError::DeviceNotFound { device_id });
        };
        Ok(DeviceHandle {
            slot,
            generation,
            device_id,
            device_type,
        })
    }

    /// Snapshot iterator over occupied slots
    ///
    /// Lazy and finite: each slot is read when the iterator reaches it, so
    /// the sequence never blocks structural changes. Call again to restart.
    /// Removed devices stay listed as `Disconnected` until their slot is
    /// reused.
    pub fn list_devices(&self) -> Devices<'_> {
        Devices {
            region: self,
            next: 0,
        }
    }

    /// Slots with pending client commands, without draining
    pub fn pending_devices(&self) -> u64 {
        self.header().pending_devices.load(Ordering::Acquire)
    }

    fn summarize(&self, index: usize) -> Option<DeviceSummary> {
        let slot = self.slot(index);
        let status = status_of(slot, Ordering::Acquire)?;
        if matches!(status, DeviceStatus::Free | DeviceStatus::Uninitialized) {
            return None;
        }
        let status = self.effective_status(slot, status);
        let budget = self.config().read_retry_budget;
        let Some(((ty, len, words), _)) = slot.generation.read(budget, || {
            (
                slot.device_type.load(Ordering::Relaxed),
                slot.id_len.load(Ordering::Relaxed) as usize,
                slot.load_id(),
            )
        }) else {
            debug!(slot = index, "slot busy during listing, skipped");
            return None;
        };
        Some(DeviceSummary {
            device_id: decode_id(&words, len)?,
            device_type: DeviceType::from_u16(ty as u16)?,
            status,
            slot: index,
        })
    }
}

fn decode_id(words: &[u64; ID_WORDS], len: usize) -> Option<DeviceId> {
    if len == 0 || len > DEVICE_ID_LEN {
        return None;
    }
    let bytes = unpack_id(words);
    let text = core::str::from_utf8(&bytes[..len]).ok()?;
    parse_device_id(text).ok()
}

/// Iterator returned by [`RegionHandle::list_devices`]
pub struct Devices<'a> {
    region: &'a RegionHandle,
    next: usize,
}

impl Iterator for Devices<'_> {
    type Item = DeviceSummary;

    fn next(&mut self) -> Option<DeviceSummary> {
        while self.next < self.region.capacity() {
            let index = self.next;
            self.next += 1;
            if let Some(summary) = self.region.summarize(index) {
                return Some(summary);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.region.capacity() - self.next))
    }
}

impl RegionOwner {
    /// Install a device with every parameter at its schema default.
    ///
    /// # Errors
    ///
    /// - `InvalidDeviceId` if the id is empty or too long
    /// - `DuplicateDevice` if a connected or stale device has this id
    /// - `CapacityExceeded` if no slot is free or reusable
    /// - `LockTimeout` if the structural lock is not acquired in time
    pub fn add_device(&self, device_id: &str, device_type: DeviceType) -> ShmResult<DeviceHandle> {
        self.ensure_live()?;
        let device_id = parse_device_id(device_id)?;
        let _lock = self.lock_structure()?;

        if self.find_present(&device_id)?.is_some() {
            return Err(ShmError::DuplicateDevice { device_id });
        }
        let index = self.pick_slot().ok_or(ShmError::CapacityExceeded {
            capacity: self.capacity(),
        })?;

        let slot = self.slot(index);
        let odd = slot
            .generation
            .begin_write(self.config().write_retry_budget)
            .ok_or(ShmError::WriteContention {
                attempts: self.config().write_retry_budget,
            })?;
        slot.status
            .store(DeviceStatus::Uninitialized as u32, Ordering::SeqCst);

        let schema = device_type.schema();
        slot.device_type.store(device_type as u32, Ordering::Relaxed);
        slot.id_len.store(device_id.len() as u32, Ordering::Relaxed);
        slot.store_id(&pack_id(&device_id));
        slot.param_count.store(schema.len() as u32, Ordering::Relaxed);
        slot.dirty.store(0, Ordering::Relaxed);
        slot.last_refresh_ms.store(now_ms(), Ordering::Relaxed);
        for (i, block) in slot.params.iter().enumerate() {
            // No accessor is pinned here, so versions can restart at zero.
            block.version.reset(0);
            match schema.get(i) {
                Some(spec) => {
                    block.value.store(spec.default.to_bits(), Ordering::Relaxed);
                    block.type_tag.store(spec.ty.tag(), Ordering::Relaxed);
                }
                None => {
                    block.value.store(0, Ordering::Relaxed);
                    block.type_tag.store(0, Ordering::Relaxed);
                }
            }
        }
        slot.generation.end_write(odd);
        slot.status
            .store(DeviceStatus::Connected as u32, Ordering::SeqCst);

        let header = self.header();
        header
            .pending_devices
            .fetch_and(!(1u64 << index), Ordering::AcqRel);
        header.device_count.fetch_add(1, Ordering::AcqRel);
        header.table_epoch.fetch_add(1, Ordering::AcqRel);

        info!(device_id = %device_id, %device_type, slot = index, "device added");
        Ok(DeviceHandle {
            slot: index,
            generation: odd + 1,
            device_id,
            device_type,
        })
    }

    /// First never-used slot, else a removed slot nobody is inside.
    fn pick_slot(&self) -> Option<usize> {
        let capacity = self.capacity();
        (0..capacity)
            .find(|i| status_of(self.slot(*i), Ordering::SeqCst) == Some(DeviceStatus::Free))
            .or_else(|| {
                (0..capacity).find(|i| {
                    let slot = self.slot(*i);
                    status_of(slot, Ordering::SeqCst) == Some(DeviceStatus::Disconnected)
                        && self.release_dead_pins(*i)
                })
            })
    }

    /// Release pins held by dead processes.
    ///
    /// Returns whether the slot is left without any pin.
    fn release_dead_pins(&self, index: usize) -> bool {
        let slot = self.slot(index);
        if slot.active_refs.load(Ordering::SeqCst) != 0 {
            return false;
        }
        slot.pins.iter().all(|word| {
            let current = word.load(Ordering::SeqCst);
            if pin_count(current) == 0 {
                return true;
            }
            let holder = pin_holder(current);
            if is_process_alive(holder) {
                return false;
            }
            let released = word
                .compare_exchange(current, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if released {
                warn!(slot = index, holder, pins = pin_count(current), "released pins of dead process");
            }
            released
        })
    }

    /// Mark the device disconnected and release its slot for reuse.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if no connected or stale device has this id
    pub fn remove_device(&self, device_id: &str) -> ShmResult<()> {
        self.ensure_live()?;
        let device_id = parse_device_id(device_id)?;
        let _lock = self.lock_structure()?;

        let Some((index, _, _)) = self.find_present(&device_id)? else {
            return Err(ShmError::DeviceNotFound { device_id });
        };
        let slot = self.slot(index);
        slot.status
            .store(DeviceStatus::Disconnected as u32, Ordering::SeqCst);
        slot.dirty.store(0, Ordering::Release);

        let header = self.header();
        header
            .pending_devices
            .fetch_and(!(1u64 << index), Ordering::AcqRel);
        header.device_count.fetch_sub(1, Ordering::AcqRel);
        header.table_epoch.fetch_add(1, Ordering::AcqRel);

        info!(device_id = %device_id, slot = index, "device removed");
        Ok(())
    }

    /// Refresh the device's liveness marker; a stale device reconnects.
    pub fn touch_device(&self, handle: &DeviceHandle) -> ShmResult<()> {
        let pinned = self.pin(handle)?;
        pinned
            .slot
            .last_refresh_ms
            .store(now_ms(), Ordering::Release);
        if pinned.status == DeviceStatus::Stale
            && pinned
                .slot
                .status
                .compare_exchange(
                    DeviceStatus::Stale as u32,
                    DeviceStatus::Connected as u32,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        {
            info!(device_id = %handle.device_id, "device reconnected");
        }
        Ok(())
    }

    /// Mark connected devices not refreshed within `timeout` as stale.
    ///
    /// Returns the number of devices marked.
    pub fn sweep_stale_devices(&self, timeout: Duration) -> usize {
        let now = now_ms();
        let limit = timeout.as_millis() as u64;
        let mut marked = 0;
        for index in 0..self.capacity() {
            let slot = self.slot(index);
            if status_of(slot, Ordering::Acquire) != Some(DeviceStatus::Connected) {
                continue;
            }
            let age = now.saturating_sub(slot.last_refresh_ms.load(Ordering::Acquire));
            if age <= limit {
                continue;
            }
            if slot
                .status
                .compare_exchange(
                    DeviceStatus::Connected as u32,
                    DeviceStatus::Stale as u32,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                let id = self
                    .summarize(index)
                    .map(|s| s.device_id)
                    .unwrap_or_default();
                warn!(device_id = %id, slot = index, age_ms = age, "device stale");
                marked += 1;
            }
        }
        marked
    }

    /// Write any parameter of a device, sensors included.
    ///
    /// Does not flag the write as a pending command.
    pub fn publish_value(&self, handle: &DeviceHandle, parameter: &str, value: Value) -> ShmResult<()> {
        self.ensure_live()?;
        let pinned = self.pin(handle)?;
        let (index, spec) = handle.device_type.param(parameter).ok_or_else(|| {
            ShmError::ParameterNotFound {
                device_id: handle.device_id.clone(),
                parameter: short_name(parameter),
            }
        })?;
        if !spec.accepts(&value) {
            return Err(ShmError::TypeMismatch {
                parameter: short_name(parameter),
                expected: spec.ty,
                actual: value.param_type(),
            });
        }
        self.write_param(&pinned, index, value)
    }

    /// Drain the set of slots with pending client commands
    pub fn take_pending_devices(&self) -> u64 {
        self.header().pending_devices.swap(0, Ordering::AcqRel)
    }

    /// Drain the parameters a client wrote since the last call
    pub fn take_pending_commands(&self, handle: &DeviceHandle) -> ShmResult<ParamMask> {
        let pinned = self.pin(handle)?;
        Ok(ParamMask(pinned.slot.dirty.swap(0, Ordering::AcqRel)))
    }

    /// Flag drained commands as pending again, for a handler that could not
    /// deliver them this cycle.
    pub fn requeue_pending_commands(&self, handle: &DeviceHandle, mask: ParamMask) -> ShmResult<()> {
        if mask.is_empty() {
            return Ok(());
        }
        let pinned = self.pin(handle)?;
        pinned.slot.dirty.fetch_or(mask.0, Ordering::AcqRel);
        self.header()
            .pending_devices
            .fetch_or(1u64 << handle.slot, Ordering::AcqRel);
        debug!(device_id = %handle.device_id, mask = mask.0, "commands requeued");
        Ok(())
    }
}
