//! Error types for shared region operations

use rtlink_common::device::{DeviceId, DeviceIdError, Name};
use rtlink_common::value::ParamType;
use thiserror::Error;

/// Errors that can occur during shared region operations
///
/// Device-level variants carry stack-allocated ids so that the get/set hot
/// path never allocates, even on failure.
#[derive(Error, Debug)]
pub enum ShmError {
    /// No live region under this name
    #[error("Region not found: {name}")]
    RegionNotFound {
        /// Region name
        name: String,
    },

    /// A live region under this name already exists
    #[error("Region already exists: {name}")]
    RegionExists {
        /// Region name
        name: String,
    },

    /// Owner terminated without cleanup
    #[error("Region {name} is stale (owner pid {owner_pid}, liveness age {age_ms} ms)")]
    RegionStale {
        /// Region name
        name: String,
        /// Recorded owner process ID
        owner_pid: u32,
        /// Age of the liveness marker in milliseconds
        age_ms: u64,
    },

    /// System resources exhausted while allocating the region
    #[error("System resource exhausted: {context}")]
    ResourceExhausted {
        /// What was being allocated
        context: String,
    },

    /// Device id already present
    #[error("Device already present: {device_id}")]
    DuplicateDevice {
        /// Device id
        device_id: DeviceId,
    },

    /// No free slot left in the device table
    #[error("Device table full: capacity {capacity}")]
    CapacityExceeded {
        /// Mapped capacity
        capacity: usize,
    },

    /// Device absent, removed, or handle outdated
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device id
        device_id: DeviceId,
    },

    /// Device present but not refreshed by its handler
    #[error("Device disconnected: {device_id}")]
    DeviceDisconnected {
        /// Device id
        device_id: DeviceId,
    },

    /// Parameter or control name unknown
    #[error("Parameter {parameter} not found on {device_id}")]
    ParameterNotFound {
        /// Device id (or `gamepad`)
        device_id: DeviceId,
        /// Requested name
        parameter: Name,
    },

    /// Value type differs from the schema type
    #[error("Type mismatch on {parameter}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Parameter name
        parameter: Name,
        /// Schema type
        expected: ParamType,
        /// Supplied type
        actual: ParamType,
    },

    /// Client wrote a sensor parameter
    #[error("Parameter {parameter} is read-only")]
    ReadOnlyParameter {
        /// Parameter name
        parameter: Name,
    },

    /// Versioned read did not observe a stable snapshot within budget
    #[error("Read contention after {attempts} attempts")]
    ReadContention {
        /// Attempts made
        attempts: u32,
    },

    /// Write section could not be entered within budget
    #[error("Write contention after {attempts} attempts")]
    WriteContention {
        /// Attempts made
        attempts: u32,
    },

    /// Device id empty or too long
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(#[from] DeviceIdError),

    /// Requested capacity out of range
    #[error("Invalid capacity {requested} (current {current}, limit {limit})")]
    InvalidCapacity {
        /// Requested capacity
        requested: usize,
        /// Current capacity (0 on create)
        current: usize,
        /// Upper limit
        limit: usize,
    },

    /// Structural lock not acquired in time
    #[error("Structural lock held by pid {holder} past timeout")]
    LockTimeout {
        /// Holder process ID
        holder: u32,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error
        #[from]
        source: serde_json::Error,
    },
}

impl ShmError {
    /// Error concerns one device or parameter; the region is still usable.
    pub fn is_device_level(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDevice { .. }
                | Self::CapacityExceeded { .. }
                | Self::DeviceNotFound { .. }
                | Self::DeviceDisconnected { .. }
                | Self::ParameterNotFound { .. }
                | Self::TypeMismatch { .. }
                | Self::ReadOnlyParameter { .. }
                | Self::ReadContention { .. }
                | Self::WriteContention { .. }
                | Self::InvalidDeviceId(_)
        )
    }

    /// Error concerns the region itself; callers should re-attach.
    pub fn is_region_level(&self) -> bool {
        matches!(
            self,
            Self::RegionNotFound { .. } | Self::RegionExists { .. } | Self::RegionStale { .. }
        )
    }
}

/// Result type for shared region operations
pub type ShmResult<T> = Result<T, ShmError>;
