//! Process configuration.
//!
//! Every rtlink process reads one TOML file. The sections here are shared by
//! all of them; a process embeds them in its own top-level struct and loads
//! that through [`ConfigLoader`].
//!
//! ```rust,no_run
//! use rtlink_common::config::{ConfigError, ConfigLoader, RegionConfig, SharedConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct PollerConfig {
//!     shared: SharedConfig,
//!     #[serde(default)]
//!     region: RegionConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = PollerConfig::load(Path::new("/etc/rtlink/poller.toml"))?;
//!     config.region.validate()?;
//!     println!("attaching to {}", config.region.region_path().display());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::consts::{
    DEFAULT_CAPACITY, DEFAULT_DEVICE_STALE_TIMEOUT_MS, DEFAULT_GAMEPAD_POLL_HZ,
    DEFAULT_LIVENESS_INTERVAL_MS, DEFAULT_READ_RETRY_BUDGET, DEFAULT_REGION_NAME,
    DEFAULT_SHM_DIR, DEFAULT_STALE_AFTER_MS, DEFAULT_WRITE_RETRY_BUDGET, MAX_DEVICES,
    MAX_GAMEPAD_POLL_HZ, MIN_GAMEPAD_POLL_HZ,
};

/// Why a configuration could not be used.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Nothing at the given path.
    #[error("no configuration file at {}", .0.display())]
    FileNotFound(PathBuf),

    /// Unreadable file, bad TOML, or a value of the wrong shape.
    #[error("cannot load {}: {reason}", .path.display())]
    Parse {
        /// File being loaded
        path: PathBuf,
        /// Reader or TOML error text
        reason: String,
    },

    /// Parsed fine, but a value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// `log_level` values; lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-cycle device steps included.
    Trace,
    /// Commands applied, skipped devices, periodic stats.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Stale devices and regions, overruns.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// `[shared]` section: what every rtlink process logs as and how loudly.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "dev-handler"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Default log verbosity; `RUST_LOG` overrides it.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Name logged at startup to tell processes apart.
    pub service_name: String,
}

impl SharedConfig {
    /// `service_name` must be a non-empty single word.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() || self.service_name.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "service_name {:?} must be a non-empty word",
                self.service_name
            )));
        }
        Ok(())
    }
}

/// Where the shared region lives and how its locks behave.
///
/// Every cooperating process on a host must agree on `name` and `shm_dir`;
/// together they form the discovery path `<shm_dir>/rtlink_<name>`.
///
/// # TOML Example
///
/// ```toml
/// [region]
/// name = "rtlink"
/// capacity = 16
/// stale_after_ms = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Region name (file name suffix).
    pub name: String,
    /// Directory holding the region file.
    pub shm_dir: PathBuf,
    /// Device capacity used when creating the region.
    pub capacity: usize,
    /// How often the owner refreshes the liveness marker.
    pub liveness_interval_ms: u64,
    /// Liveness marker age after which the region counts as stale.
    ///
    /// This and the two neighbouring windows are written into the region
    /// header on create; attachers follow the header, not their own copy.
    pub stale_after_ms: u64,
    /// Device marker age after which a device counts as stale.
    pub device_stale_timeout_ms: u64,
    /// Versioned read attempts before `ReadContention`.
    pub read_retry_budget: u32,
    /// Attempts to enter a write section before `WriteContention`.
    pub write_retry_budget: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_REGION_NAME.to_string(),
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            capacity: DEFAULT_CAPACITY,
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL_MS,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            device_stale_timeout_ms: DEFAULT_DEVICE_STALE_TIMEOUT_MS,
            read_retry_budget: DEFAULT_READ_RETRY_BUDGET,
            write_retry_budget: DEFAULT_WRITE_RETRY_BUDGET,
        }
    }
}

impl RegionConfig {
    /// Default settings for a named region in a given directory.
    pub fn named(shm_dir: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            shm_dir: shm_dir.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `name` is empty or contains a path separator
    /// - `capacity` is outside `1..=MAX_DEVICES`
    /// - `stale_after_ms` does not exceed `liveness_interval_ms`
    /// - a retry budget is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "region name {:?} must be non-empty and contain no '/'",
                self.name
            )));
        }
        if self.capacity == 0 || self.capacity > MAX_DEVICES {
            return Err(ConfigError::Invalid(format!(
                "capacity {} outside 1..={MAX_DEVICES}",
                self.capacity
            )));
        }
        if self.stale_after_ms <= self.liveness_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "stale_after_ms ({}) must exceed liveness_interval_ms ({})",
                self.stale_after_ms, self.liveness_interval_ms
            )));
        }
        if self.read_retry_budget == 0 || self.write_retry_budget == 0 {
            return Err(ConfigError::Invalid(
                "retry budgets must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Liveness refresh interval.
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Region stale window.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Device stale window.
    pub fn device_stale_timeout(&self) -> Duration {
        Duration::from_millis(self.device_stale_timeout_ms)
    }

    /// Full path of the region file.
    pub fn region_path(&self) -> PathBuf {
        region_path(&self.shm_dir, &self.name)
    }
}

/// Discovery path of a region: `<dir>/rtlink_<name>`.
pub fn region_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", crate::consts::REGION_FILE_PREFIX, name))
}

/// Discovery metadata path of a region: `<dir>/rtlink_<name>.meta`.
pub fn region_meta_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(
        "{}{}.{}",
        crate::consts::REGION_FILE_PREFIX,
        name,
        crate::consts::REGION_META_EXT
    ))
}

/// Gamepad poller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamepadConfig {
    /// Sampling rate in Hz.
    pub poll_hz: u32,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            poll_hz: DEFAULT_GAMEPAD_POLL_HZ,
        }
    }
}

impl GamepadConfig {
    /// Validate the sampling rate against the supported window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_GAMEPAD_POLL_HZ..=MAX_GAMEPAD_POLL_HZ).contains(&self.poll_hz) {
            return Err(ConfigError::Invalid(format!(
                "gamepad poll_hz {} outside {MIN_GAMEPAD_POLL_HZ}..={MAX_GAMEPAD_POLL_HZ}",
                self.poll_hz
            )));
        }
        Ok(())
    }

    /// Interval between two samples.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.poll_hz.max(1)))
    }
}

/// Load any deserializable config struct from a TOML file.
///
/// Implemented for every `DeserializeOwned` type. Loading only parses;
/// range checks stay with each section's `validate`.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Parse `text`; `origin` only names the source in errors.
    fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.message().to_string(),
        })
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
