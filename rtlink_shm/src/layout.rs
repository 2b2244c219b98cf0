//! Region memory layout
//!
//! ```text
//! offset 0     RegionHeader   128 bytes
//! offset 128   GamepadBlock    64 bytes
//! offset 192   DeviceSlot[0]  320 bytes
//! ...          DeviceSlot[capacity - 1]
//! ```
//!
//! Every field other than explicit padding is an atomic. Processes map the
//! same file and never hold plain references into each other's writes, so
//! all concurrent access is defined behaviour; consistency across several
//! words comes from the [`VersionCounter`]s.

use rtlink_common::consts::{
    CACHE_LINE_SIZE, DEVICE_ID_LEN, GAMEPAD_AXIS_COUNT, MAX_DEVICES, MAX_PARAMS,
};
use static_assertions::{const_assert, const_assert_eq};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::version::VersionCounter;

/// Number of 64-bit words holding a packed device id.
pub const ID_WORDS: usize = DEVICE_ID_LEN / 8;

/// Region lifecycle state stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegionState {
    /// Header being written by the creator.
    Initializing = 0,
    /// Owner running.
    Live = 1,
    /// Owner destroyed the region cleanly.
    Destroyed = 2,
}

impl RegionState {
    /// Convert from the raw header word.
    pub const fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Initializing),
            1 => Some(Self::Live),
            2 => Some(Self::Destroyed),
            _ => None,
        }
    }
}

/// Region header with cache-line alignment
#[repr(C, align(64))]
pub struct RegionHeader {
    /// Magic number for validation
    pub magic: AtomicU64,
    /// Layout revision
    pub layout_version: AtomicU32,
    /// Device slots in the backing file
    pub capacity: AtomicU32,
    /// Owner process ID
    pub owner_pid: AtomicU32,
    /// [`RegionState`] discriminant
    pub state: AtomicU32,
    /// PID of the structural lock holder, 0 when free
    pub structural_lock: AtomicU32,
    /// Devices currently present
    pub device_count: AtomicU32,
    /// Robot run mode
    pub run_mode: AtomicU32,
    _pad0: u32,
    /// Bit per slot with pending client commands
    pub pending_devices: AtomicU64,
    /// Liveness refresh counter
    pub heartbeat: AtomicU64,
    /// Last liveness refresh, ms since epoch
    pub liveness_ms: AtomicU64,
    /// Creation time, ms since epoch
    pub created_ms: AtomicU64,
    /// Bumped on every structural change
    pub table_epoch: AtomicU64,
    /// Failed versioned reads across all clients
    pub read_contention: AtomicU64,
    /// Owner's liveness refresh interval, ms
    pub liveness_interval_ms: AtomicU64,
    /// Liveness age after which the region counts as stale, ms
    pub stale_after_ms: AtomicU64,
    /// Refresh age after which a device counts as stale, ms
    pub device_timeout_ms: AtomicU64,
    _reserved: [u64; 2],
}

impl RegionHeader {
    /// Current lifecycle state; unknown values read as `Initializing`.
    #[inline]
    pub fn state(&self) -> RegionState {
        RegionState::from_raw(self.state.load(Ordering::Acquire)).unwrap_or(RegionState::Initializing)
    }

    /// Age of the liveness marker at `now_ms`.
    #[inline]
    pub fn liveness_age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.liveness_ms.load(Ordering::Acquire))
    }
}

/// Gamepad state guarded by one version counter
#[repr(C, align(64))]
pub struct GamepadBlock {
    /// Seqlock over every field below
    pub version: VersionCounter,
    /// Poll cycle counter
    pub sequence: AtomicU64,
    /// Button bitfield
    pub buttons: AtomicU32,
    /// 1 when a pad is attached
    pub connected: AtomicU32,
    /// Axis positions as `f32` bit patterns
    pub axes: [AtomicU32; GAMEPAD_AXIS_COUNT],
    /// PID inside the write section, 0 otherwise
    pub writer_pid: AtomicU32,
    _pad0: u32,
    _reserved: [u64; 2],
}

/// One typed value plus its version
#[repr(C)]
pub struct ParamBlock {
    /// Seqlock over `value`
    pub version: VersionCounter,
    /// Encoded payload
    pub value: AtomicU64,
    /// [`ParamType`](rtlink_common::value::ParamType) tag, 0 when unused
    pub type_tag: AtomicU32,
    /// PID inside the write section, 0 otherwise
    pub writer_pid: AtomicU32,
}

/// Pin words per slot.
pub const PIN_WAYS: usize = 7;

/// One device table entry
///
/// `generation` guards the identity fields (type, id, id length, parameter
/// count). It is odd while a device is being installed and moves by two for
/// every new instance, so handles taken from an older instance never match.
///
/// Accessors pin the slot in `pins`, one word per process: pid in the high
/// half, pin count in the low half. Processes that find no free word fall
/// back to the anonymous `active_refs` counter.
#[repr(C, align(64))]
pub struct DeviceSlot {
    /// Seqlock over the identity fields
    pub generation: VersionCounter,
    /// [`DeviceStatus`](rtlink_common::device::DeviceStatus) discriminant
    pub status: AtomicU32,
    /// [`DeviceType`](rtlink_common::device::DeviceType) discriminant
    pub device_type: AtomicU32,
    /// Device id length in bytes
    pub id_len: AtomicU32,
    /// Pins by processes that found no free pin word
    pub active_refs: AtomicU32,
    /// Bit per parameter written by a client since the last drain
    pub dirty: AtomicU32,
    /// Parameters in use
    pub param_count: AtomicU32,
    /// Last handler refresh, ms since epoch
    pub last_refresh_ms: AtomicU64,
    /// Device id bytes, little-endian, zero padded
    pub id: [AtomicU64; ID_WORDS],
    /// Per-process pin counts
    pub pins: [AtomicU64; PIN_WAYS],
    /// Parameter blocks in schema order
    pub params: [ParamBlock; MAX_PARAMS],
}

/// Size of the region header in bytes.
pub const HEADER_SIZE: usize = size_of::<RegionHeader>();
/// Offset of the gamepad block.
pub const GAMEPAD_OFFSET: usize = HEADER_SIZE;
/// Offset of the first device slot.
pub const SLOTS_OFFSET: usize = GAMEPAD_OFFSET + size_of::<GamepadBlock>();
/// Size of one device slot in bytes.
pub const SLOT_SIZE: usize = size_of::<DeviceSlot>();

const_assert_eq!(size_of::<RegionHeader>(), 128);
const_assert_eq!(size_of::<GamepadBlock>(), 64);
const_assert_eq!(size_of::<ParamBlock>(), 24);
const_assert_eq!(size_of::<DeviceSlot>(), 320);
const_assert_eq!(SLOTS_OFFSET % CACHE_LINE_SIZE, 0);
const_assert_eq!(std::mem::offset_of!(DeviceSlot, params) % CACHE_LINE_SIZE, 0);
const_assert!(MAX_DEVICES <= 64);
const_assert!(MAX_PARAMS <= 32);

/// Total file size for a region with `capacity` slots.
pub const fn region_size(capacity: usize) -> usize {
    SLOTS_OFFSET + capacity * SLOT_SIZE
}

/// Pack a device id into little-endian words.
pub fn pack_id(id: &str) -> [u64; ID_WORDS] {
    let mut bytes = [0u8; DEVICE_ID_LEN];
    let len = id.len().min(DEVICE_ID_LEN);
    bytes[..len].copy_from_slice(&id.as_bytes()[..len]);
    let mut words = [0u64; ID_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *word = u64::from_le_bytes(buf);
    }
    words
}

/// Unpack words written by [`pack_id`] into raw bytes.
pub fn unpack_id(words: &[u64; ID_WORDS]) -> [u8; DEVICE_ID_LEN] {
    let mut bytes = [0u8; DEVICE_ID_LEN];
    for (chunk, word) in bytes.chunks_exact_mut(8).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Pin word for `pid` holding `count` pins.
#[inline]
pub const fn pin_word(pid: u32, count: u32) -> u64 {
    ((pid as u64) << 32) | count as u64
}

/// Holder pid of a pin word.
#[inline]
pub const fn pin_holder(word: u64) -> u32 {
    (word >> 32) as u32
}

/// Pin count of a pin word.
#[inline]
pub const fn pin_count(word: u64) -> u32 {
    word as u32
}

impl DeviceSlot {
    /// Load the packed id words. Call inside a `generation` read.
    #[inline]
    pub fn load_id(&self) -> [u64; ID_WORDS] {
        let mut out = [0u64; ID_WORDS];
        for (dst, src) in out.iter_mut().zip(&self.id) {
            *dst = src.load(Ordering::Relaxed);
        }
        out
    }

    /// Store packed id words. Call inside a `generation` write.
    #[inline]
    pub fn store_id(&self, words: &[u64; ID_WORDS]) {
        for (dst, src) in self.id.iter().zip(words) {
            dst.store(*src, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_size() {
        assert_eq!(region_size(0), 192);
        assert_eq!(region_size(4), 192 + 4 * 320);
    }

    #[test]
    fn test_id_packing() {
        let words = pack_id("left_motor");
        let bytes = unpack_id(&words);
        assert_eq!(&bytes[..10], b"left_motor");
        assert!(bytes[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_full_length_id() {
        let id = "abcdefghijklmnopqrstuvwxyz012345";
        assert_eq!(id.len(), DEVICE_ID_LEN);
        assert_eq!(&unpack_id(&pack_id(id)), id.as_bytes());
    }

    #[test]
    fn test_pin_word_fields() {
        let word = pin_word(4242, 3);
        assert_eq!(pin_holder(word), 4242);
        assert_eq!(pin_count(word), 3);
        assert_eq!(pin_count(word + 1), 4);
        assert_eq!(pin_word(0, 0), 0);
    }

    #[test]
    fn test_magic_bytes() {
        let magic = rtlink_common::consts::REGION_MAGIC.to_le_bytes();
        assert_eq!(&magic, b"RTLINK\0\0");
    }
}
