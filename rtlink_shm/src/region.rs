//! Region lifecycle: create, attach, liveness, grow, destroy

use crate::discovery::RegionInfo;
use crate::error::{ShmError, ShmResult};
use crate::layout::{
    DeviceSlot, GamepadBlock, HEADER_SIZE, RegionHeader, RegionState, GAMEPAD_OFFSET,
    SLOT_SIZE, SLOTS_OFFSET, region_size,
};
use crate::platform::{
    classify_io, create_region_file, get_current_pid, is_process_alive, map_file, now_ms,
    open_region_file,
};
use memmap2::MmapMut;
use rtlink_common::config::{RegionConfig, region_meta_path};
use rtlink_common::consts::{LAYOUT_VERSION, MAX_DEVICES, REGION_MAGIC, STRUCTURAL_LOCK_TIMEOUT_MS};
use rtlink_common::device::RunMode;
use std::fmt;
use std::fs::File;
use std::io::ErrorKind;
use std::ops::Deref;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Attached view of a shared region
///
/// Cheap to share between threads by reference. Every process that maps the
/// region holds one; the owner's lives inside its [`RegionOwner`].
pub struct RegionHandle {
    base: NonNull<u8>,
    // Keeps the mapping behind `base` alive.
    _mmap: MmapMut,
    capacity: usize,
    config: RegionConfig,
    pid: u32,
}

// SAFETY: every byte reachable through `base` is accessed through atomics,
// and the mapping lives as long as the handle.
unsafe impl Send for RegionHandle {}
unsafe impl Sync for RegionHandle {}

impl RegionHandle {
    /// Attach to the region named by `config`.
    ///
    /// # Errors
    ///
    /// - `RegionNotFound` if the file is missing, not yet initialized, of an
    ///   unknown layout, or already destroyed
    /// - `RegionStale` if the owner process is gone or stopped refreshing
    pub fn attach(config: &RegionConfig) -> ShmResult<Self> {
        let path = config.region_path();
        let (_file, mut mmap) = match open_region_file(&path) {
            Ok(pair) => pair,
            Err(ShmError::Io { source }) if source.kind() == ErrorKind::NotFound => {
                return Err(not_found(config));
            }
            Err(e) => return Err(e),
        };
        if mmap.len() < HEADER_SIZE {
            return Err(not_found(config));
        }

        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| not_found(config))?;
        // SAFETY: the mapping is page aligned and at least HEADER_SIZE long.
        let header = unsafe { &*(base.as_ptr() as *const RegionHeader) };
        validate_header(header, config)?;

        let capacity = header.capacity.load(Ordering::Acquire) as usize;
        if capacity > MAX_DEVICES || mmap.len() < region_size(capacity) {
            return Err(not_found(config));
        }
        check_liveness(header, &config.name)?;

        debug!(region = %config.name, capacity, "attached to region");
        Ok(Self {
            base,
            _mmap: mmap,
            capacity,
            config: config.clone(),
            pid: get_current_pid(),
        })
    }

    /// Attach to `<dir>/rtlink_<name>` with default settings.
    pub fn attach_in(dir: impl AsRef<Path>, name: &str) -> ShmResult<Self> {
        Self::attach(&RegionConfig::named(dir.as_ref(), name))
    }

    /// Region name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Settings this handle was attached with
    ///
    /// Liveness windows come from the region header, not from here.
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Region stale window published by the owner
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.header().stale_after_ms.load(Ordering::Relaxed))
    }

    /// Device stale window published by the owner
    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms())
    }

    #[inline]
    pub(crate) fn device_timeout_ms(&self) -> u64 {
        self.header().device_timeout_ms.load(Ordering::Relaxed)
    }

    /// PID of the process that mapped this handle.
    #[inline]
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Slots visible through this mapping
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path of the backing file
    pub fn path(&self) -> PathBuf {
        self.config.region_path()
    }

    /// Raw header, for diagnostics
    #[inline]
    pub fn header(&self) -> &RegionHeader {
        // SAFETY: validated at attach/create; the mapping outlives `self`.
        unsafe { &*(self.base.as_ptr() as *const RegionHeader) }
    }

    #[inline]
    pub(crate) fn gamepad_block(&self) -> &GamepadBlock {
        // SAFETY: GAMEPAD_OFFSET + size_of::<GamepadBlock>() <= region_size(0).
        unsafe { &*(self.base.as_ptr().add(GAMEPAD_OFFSET) as *const GamepadBlock) }
    }

    /// Slot `index`; callers keep `index < self.capacity`.
    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &DeviceSlot {
        debug_assert!(index < self.capacity);
        // SAFETY: the mapping covers region_size(self.capacity) bytes.
        unsafe {
            &*(self.base.as_ptr().add(SLOTS_OFFSET + index * SLOT_SIZE) as *const DeviceSlot)
        }
    }

    /// Fail with `RegionNotFound` once the owner destroyed the region and
    /// with `RegionStale` once it stopped refreshing the liveness marker.
    ///
    /// Runs on every access, so it only reads the header; [`health`](Self::health)
    /// also checks that the owner process is alive.
    #[inline]
    pub(crate) fn ensure_live(&self) -> ShmResult<()> {
        let header = self.header();
        if header.state() != RegionState::Live {
            return Err(not_found(&self.config));
        }
        let age_ms = header.liveness_age_ms(now_ms());
        if age_ms > header.stale_after_ms.load(Ordering::Relaxed) {
            return Err(ShmError::RegionStale {
                name: self.config.name.clone(),
                owner_pid: header.owner_pid.load(Ordering::Relaxed),
                age_ms,
            });
        }
        Ok(())
    }

    /// Re-run the attach-time liveness checks.
    pub fn health(&self) -> ShmResult<()> {
        let header = self.header();
        validate_header(header, &self.config)?;
        check_liveness(header, &self.config.name)
    }

    /// Whether the owner grew the region past this mapping.
    ///
    /// Re-attach to see the new slots.
    pub fn capacity_changed(&self) -> bool {
        self.header().capacity.load(Ordering::Acquire) as usize != self.capacity
    }

    /// Robot run mode
    pub fn get_run_mode(&self) -> RunMode {
        RunMode::from_raw(self.header().run_mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Publish a new robot run mode
    pub fn set_run_mode(&self, mode: RunMode) -> ShmResult<()> {
        self.ensure_live()?;
        let previous = self.header().run_mode.swap(mode as u32, Ordering::AcqRel);
        if previous != mode as u32 {
            info!(region = %self.config.name, %mode, "run mode changed");
        }
        Ok(())
    }

    pub(crate) fn note_read_contention(&self, attempts: u32) -> ShmError {
        let total = self.header().read_contention.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(region = %self.config.name, attempts, total, "versioned read exhausted retry budget");
        ShmError::ReadContention { attempts }
    }

    /// Take the region-wide structural lock.
    ///
    /// The lock word holds the holder's pid. A holder that no longer exists
    /// loses the lock to the next caller.
    pub(crate) fn lock_structure(&self) -> ShmResult<StructuralLock<'_>> {
        let word = &self.header().structural_lock;
        let me = get_current_pid();
        let deadline = Instant::now() + Duration::from_millis(STRUCTURAL_LOCK_TIMEOUT_MS);
        let mut attempt = 0u32;
        loop {
            let holder = match word.compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return Ok(StructuralLock { word }),
                Err(holder) => holder,
            };
            if holder != me && !is_process_alive(holder) {
                if word
                    .compare_exchange(holder, me, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!(region = %self.config.name, holder, "took structural lock from dead process");
                    return Ok(StructuralLock { word });
                }
                continue;
            }
            if Instant::now() >= deadline {
                return Err(ShmError::LockTimeout { holder });
            }
            attempt += 1;
            if attempt < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(Duration::from_micros(50));
            }
        }
    }

    fn remap(&mut self, mut mmap: MmapMut, capacity: usize) -> ShmResult<()> {
        self.base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| not_found(&self.config))?;
        self._mmap = mmap;
        self.capacity = capacity;
        Ok(())
    }
}

impl fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionHandle")
            .field("name", &self.config.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Held structural lock; released on drop.
pub(crate) struct StructuralLock<'a> {
    word: &'a AtomicU32,
}

impl Drop for StructuralLock<'_> {
    fn drop(&mut self) {
        self.word.store(0, Ordering::Release);
    }
}

/// The creating process's view of a region
///
/// Only [`RegionOwner::create`] produces one, so only the device-handling
/// process can add or remove devices, grow, or destroy. Derefs to
/// [`RegionHandle`] for every client operation. Dropping it destroys the
/// region.
pub struct RegionOwner {
    handle: RegionHandle,
    file: File,
    destroyed: bool,
}

impl RegionOwner {
    /// Create and publish the region named by `config`.
    ///
    /// A leftover region whose owner died is reclaimed.
    ///
    /// # Errors
    ///
    /// - `InvalidCapacity` if `config.capacity` is 0 or above `MAX_DEVICES`
    /// - `RegionExists` if a live region already uses the name
    /// - `ResourceExhausted` if the backing memory cannot be allocated
    pub fn create(config: &RegionConfig) -> ShmResult<Self> {
        let capacity = config.capacity;
        if capacity == 0 || capacity > MAX_DEVICES {
            return Err(ShmError::InvalidCapacity {
                requested: capacity,
                current: 0,
                limit: MAX_DEVICES,
            });
        }

        let path = config.region_path();
        let size = region_size(capacity);
        let (file, mut mmap) = match create_region_file(&path, size) {
            Ok(pair) => pair,
            Err(ShmError::Io { source }) if source.kind() == ErrorKind::AlreadyExists => {
                reclaim_if_stale(config)?;
                create_region_file(&path, size).map_err(|e| match e {
                    ShmError::Io { source } if source.kind() == ErrorKind::AlreadyExists => {
                        ShmError::RegionExists {
                            name: config.name.clone(),
                        }
                    }
                    other => other,
                })?
            }
            Err(e) => return Err(e),
        };

        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| not_found(config))?;
        // SAFETY: fresh zero-filled mapping of `size >= HEADER_SIZE` bytes.
        let header = unsafe { &*(base.as_ptr() as *const RegionHeader) };
        let now = now_ms();
        header.layout_version.store(LAYOUT_VERSION, Ordering::Relaxed);
        header.capacity.store(capacity as u32, Ordering::Relaxed);
        header.owner_pid.store(get_current_pid(), Ordering::Relaxed);
        header.run_mode.store(RunMode::Idle as u32, Ordering::Relaxed);
        header.created_ms.store(now, Ordering::Relaxed);
        header.liveness_ms.store(now, Ordering::Relaxed);
        header
            .liveness_interval_ms
            .store(config.liveness_interval_ms, Ordering::Relaxed);
        header.stale_after_ms.store(config.stale_after_ms, Ordering::Relaxed);
        header
            .device_timeout_ms
            .store(config.device_stale_timeout_ms, Ordering::Relaxed);
        header.heartbeat.store(1, Ordering::Relaxed);
        header.magic.store(REGION_MAGIC, Ordering::Release);
        header.state.store(RegionState::Live as u32, Ordering::Release);

        let owner = Self {
            handle: RegionHandle {
                base,
                _mmap: mmap,
                capacity,
                config: config.clone(),
                pid: get_current_pid(),
            },
            file,
            destroyed: false,
        };
        owner.write_meta()?;

        info!(
            region = %config.name,
            path = %path.display(),
            capacity,
            bytes = size,
            stale_after_ms = config.stale_after_ms,
            device_timeout_ms = config.device_stale_timeout_ms,
            "region created"
        );
        Ok(owner)
    }

    /// Create `<dir>/rtlink_<name>` with `capacity` slots and default settings.
    pub fn create_in(dir: impl AsRef<Path>, name: &str, capacity: usize) -> ShmResult<Self> {
        let mut config = RegionConfig::named(dir.as_ref(), name);
        config.capacity = capacity;
        Self::create(&config)
    }

    /// Bump the heartbeat and liveness timestamp.
    #[inline]
    pub fn refresh_liveness(&self) {
        let header = self.handle.header();
        header.liveness_ms.store(now_ms(), Ordering::Release);
        header.heartbeat.fetch_add(1, Ordering::AcqRel);
    }

    /// Extend the region to `new_capacity` slots.
    ///
    /// Attached clients keep their current mapping and see
    /// [`RegionHandle::capacity_changed`] turn true.
    pub fn grow(&mut self, new_capacity: usize) -> ShmResult<()> {
        self.handle.ensure_live()?;
        let current = self.handle.capacity;
        if new_capacity <= current || new_capacity > MAX_DEVICES {
            return Err(ShmError::InvalidCapacity {
                requested: new_capacity,
                current,
                limit: MAX_DEVICES,
            });
        }

        let mmap = {
            let _lock = self.handle.lock_structure()?;
            self.file
                .set_len(region_size(new_capacity) as u64)
                .map_err(|e| classify_io(e, "region grow"))?;
            let mmap = map_file(&self.file, true)?;
            let header = self.handle.header();
            header.capacity.store(new_capacity as u32, Ordering::Release);
            header.table_epoch.fetch_add(1, Ordering::AcqRel);
            mmap
        };
        self.handle.remap(mmap, new_capacity)?;
        self.write_meta()?;

        info!(region = %self.handle.config.name, from = current, to = new_capacity, "region grown");
        Ok(())
    }

    /// Mark the region destroyed and unlink its files. Idempotent.
    pub fn destroy(&mut self) -> ShmResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.handle
            .header()
            .state
            .store(RegionState::Destroyed as u32, Ordering::Release);

        let path = self.handle.path();
        if self.still_backs(&path) {
            std::fs::remove_file(&path)?;
            let meta = region_meta_path(&self.handle.config.shm_dir, &self.handle.config.name);
            match std::fs::remove_file(&meta) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            debug!(path = %path.display(), "region file replaced, leaving it in place");
        }

        info!(region = %self.handle.config.name, "region destroyed");
        Ok(())
    }

    /// Whether `path` still names the file this owner created.
    fn still_backs(&self, path: &Path) -> bool {
        match (std::fs::metadata(path), self.file.metadata()) {
            (Ok(on_disk), Ok(mine)) => on_disk.ino() == mine.ino() && on_disk.dev() == mine.dev(),
            _ => false,
        }
    }

    fn write_meta(&self) -> ShmResult<()> {
        let header = self.handle.header();
        let info = RegionInfo {
            name: self.handle.config.name.clone(),
            capacity: self.handle.capacity,
            owner_pid: header.owner_pid.load(Ordering::Relaxed),
            layout_version: LAYOUT_VERSION,
            created_ms: header.created_ms.load(Ordering::Relaxed),
        };
        info.write(&self.handle.config.shm_dir)
    }
}

impl Deref for RegionOwner {
    type Target = RegionHandle;

    fn deref(&self) -> &RegionHandle {
        &self.handle
    }
}

impl fmt::Debug for RegionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionOwner")
            .field("name", &self.handle.config.name)
            .field("capacity", &self.handle.capacity)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl Drop for RegionOwner {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!(region = %self.handle.config.name, error = %e, "region cleanup failed");
        }
    }
}

fn not_found(config: &RegionConfig) -> ShmError {
    ShmError::RegionNotFound {
        name: config.name.clone(),
    }
}

fn validate_header(header: &RegionHeader, config: &RegionConfig) -> ShmResult<()> {
    if header.magic.load(Ordering::Acquire) != REGION_MAGIC
        || header.layout_version.load(Ordering::Relaxed) != LAYOUT_VERSION
    {
        return Err(not_found(config));
    }
    match header.state() {
        RegionState::Live => Ok(()),
        RegionState::Initializing | RegionState::Destroyed => Err(not_found(config)),
    }
}

/// Owner alive and liveness marker younger than the window it published.
fn owner_is_live(header: &RegionHeader) -> bool {
    let owner_pid = header.owner_pid.load(Ordering::Acquire);
    is_process_alive(owner_pid)
        && header.liveness_age_ms(now_ms()) <= header.stale_after_ms.load(Ordering::Relaxed)
}

fn check_liveness(header: &RegionHeader, name: &str) -> ShmResult<()> {
    if owner_is_live(header) {
        return Ok(());
    }
    let owner_pid = header.owner_pid.load(Ordering::Acquire);
    let age_ms = header.liveness_age_ms(now_ms());
    warn!(region = %name, owner_pid, age_ms, "region is stale");
    Err(ShmError::RegionStale {
        name: name.to_string(),
        owner_pid,
        age_ms,
    })
}

/// Remove a region left behind by a dead owner, or report the live one.
fn reclaim_if_stale(config: &RegionConfig) -> ShmResult<()> {
    let path = config.region_path();
    if let Ok((_file, mmap)) = open_region_file(&path) {
        if mmap.len() >= HEADER_SIZE {
            // SAFETY: the mapping is page aligned and at least HEADER_SIZE long.
            let header = unsafe { &*(mmap.as_ptr() as *const RegionHeader) };
            let owner_pid = header.owner_pid.load(Ordering::Acquire);
            let age_ms = header.liveness_age_ms(now_ms());
            let live = match header.state() {
                RegionState::Destroyed => false,
                RegionState::Initializing => is_process_alive(owner_pid),
                RegionState::Live => owner_is_live(header),
            };
            if live {
                return Err(ShmError::RegionExists {
                    name: config.name.clone(),
                });
            }
            warn!(region = %config.name, owner_pid, age_ms, "reclaiming stale region");
        }
    }

    for stale in [path, region_meta_path(&config.shm_dir, &config.name)] {
        match std::fs::remove_file(&stale) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
