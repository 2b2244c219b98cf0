//! Device handler errors.

use rtlink_common::config::ConfigError;
use rtlink_shm::ShmError;
use thiserror::Error;

/// Errors raised while starting or running the device handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shared region operation failed.
    #[error("shared region error: {0}")]
    Shm(#[from] ShmError),

    /// A device listed twice in the configuration.
    #[error("device '{0}' configured more than once")]
    DuplicateConfigDevice(String),

    /// Operation on a device the handler does not drive.
    #[error("device '{0}' is not handled by this process")]
    UnknownDevice(String),
}

impl HandlerError {
    /// Whether the cycle loop can carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Shm(e) if e.is_device_level())
    }
}
