//! System-wide constants for the rtlink workspace.
//!
//! Single source of truth for all numeric limits, defaults and discovery
//! names. Imported by all crates, no duplication permitted.

/// Maximum number of devices a single region can hold.
///
/// Bounded by the 64-bit pending-device mask in the region header.
pub const MAX_DEVICES: usize = 64;

/// Maximum number of parameters in one device schema.
///
/// Bounded by the 32-bit pending-command mask per device; 8 keeps a device
/// slot at five cache lines.
pub const MAX_PARAMS: usize = 8;

/// Maximum device identifier length in bytes.
pub const DEVICE_ID_LEN: usize = 32;

/// Maximum parameter / control name length carried in errors.
pub const NAME_LEN: usize = 32;

/// Number of gamepad buttons (bits used in the button field).
pub const GAMEPAD_BUTTON_COUNT: usize = 17;

/// Number of gamepad axes.
pub const GAMEPAD_AXIS_COUNT: usize = 4;

/// CPU cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Magic bytes at offset 0 of every region: `"RTLINK\0\0"` little-endian.
pub const REGION_MAGIC: u64 = u64::from_le_bytes(*b"RTLINK\0\0");

/// Region layout revision; attachers reject any other value.
pub const LAYOUT_VERSION: u32 = 2;

/// Upper bound on waiting for the structural lock.
pub const STRUCTURAL_LOCK_TIMEOUT_MS: u64 = 500;

/// Default region name (discovery convention, identical on every process).
pub const DEFAULT_REGION_NAME: &str = "rtlink";

/// Directory holding region files and their `.meta` companions.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Prefix of every region file name: `<dir>/rtlink_<name>`.
pub const REGION_FILE_PREFIX: &str = "rtlink_";

/// Extension of the JSON discovery metadata file.
pub const REGION_META_EXT: &str = "meta";

/// Default device capacity of a freshly created region.
pub const DEFAULT_CAPACITY: usize = 16;

/// Default number of attempts for a versioned read before `ReadContention`.
pub const DEFAULT_READ_RETRY_BUDGET: u32 = 128;

/// Default number of attempts to enter a parameter's write section.
pub const DEFAULT_WRITE_RETRY_BUDGET: u32 = 1024;

/// Default interval at which the owner refreshes the region liveness marker.
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 100;

/// Default age after which an unrefreshed region is considered stale.
pub const DEFAULT_STALE_AFTER_MS: u64 = 2_000;

/// Default age after which an unrefreshed device is marked STALE.
pub const DEFAULT_DEVICE_STALE_TIMEOUT_MS: u64 = 1_000;

/// Default gamepad sampling rate.
pub const DEFAULT_GAMEPAD_POLL_HZ: u32 = 50;

/// Lowest accepted gamepad sampling rate.
pub const MIN_GAMEPAD_POLL_HZ: u32 = 20;

/// Highest accepted gamepad sampling rate.
pub const MAX_GAMEPAD_POLL_HZ: u32 = 60;

/// Default device-handler cycle time in microseconds (100 Hz).
pub const DEFAULT_CYCLE_TIME_US: u64 = 10_000;

/// Default device-handler configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rtlink/dev_handler.toml";
