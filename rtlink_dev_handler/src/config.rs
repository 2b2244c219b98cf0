//! Device handler configuration (`dev_handler.toml`).
//!
//! ```toml
//! cycle_time_us = 10000
//!
//! [shared]
//! service_name = "dev-handler"
//! log_level = "info"
//!
//! [region]
//! name = "rtlink"
//! capacity = 16
//!
//! [gamepad]
//! poll_hz = 50
//!
//! [[devices]]
//! id = "left_drive"
//! type = "motor_controller"
//! ```

use crate::error::HandlerError;
use rtlink_common::config::{ConfigError, GamepadConfig, RegionConfig, SharedConfig};
use rtlink_common::consts::DEFAULT_CYCLE_TIME_US;
use rtlink_common::device::{DeviceType, parse_device_id};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Shortest accepted cycle.
const MIN_CYCLE_TIME_US: u64 = 100;
/// Longest accepted cycle.
const MAX_CYCLE_TIME_US: u64 = 1_000_000;

/// One device the handler installs at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Device id as seen by clients.
    pub id: String,
    /// Schema the device follows.
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

/// Full device handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevHandlerConfig {
    /// Logging and service identity.
    pub shared: SharedConfig,
    /// Shared region placement and lock budgets.
    #[serde(default)]
    pub region: RegionConfig,
    /// Gamepad poll rate, used when the virtual gamepad runs.
    #[serde(default)]
    pub gamepad: GamepadConfig,
    /// Target cycle period in microseconds.
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u64,
    /// Devices installed at startup.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

fn default_cycle_time_us() -> u64 {
    DEFAULT_CYCLE_TIME_US
}

impl DevHandlerConfig {
    /// Validate every section and the device list.
    ///
    /// # Errors
    ///
    /// `Config` for invalid sections, bad device ids or more devices than
    /// the region holds; `DuplicateConfigDevice` for repeated ids.
    pub fn validate(&self) -> Result<(), HandlerError> {
        self.shared.validate()?;
        self.region.validate()?;
        self.gamepad.validate()?;

        if !(MIN_CYCLE_TIME_US..=MAX_CYCLE_TIME_US).contains(&self.cycle_time_us) {
            return Err(ConfigError::Invalid(format!(
                "cycle_time_us must be within {MIN_CYCLE_TIME_US}..={MAX_CYCLE_TIME_US}, got {}",
                self.cycle_time_us
            ))
            .into());
        }
        if self.devices.len() > self.region.capacity {
            return Err(ConfigError::Invalid(format!(
                "{} devices configured but region capacity is {}",
                self.devices.len(),
                self.region.capacity
            ))
            .into());
        }

        let mut seen = HashSet::new();
        for entry in &self.devices {
            parse_device_id(&entry.id)
                .map_err(|e| ConfigError::Invalid(format!("device '{}': {e}", entry.id)))?;
            if !seen.insert(entry.id.as_str()) {
                return Err(HandlerError::DuplicateConfigDevice(entry.id.clone()));
            }
        }
        Ok(())
    }

    /// Target cycle period.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_micros(self.cycle_time_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtlink_common::config::ConfigLoader;
    use std::io::Write;

    const SAMPLE: &str = r#"
cycle_time_us = 5000

[shared]
service_name = "dev-handler"

[region]
name = "robot"
capacity = 4

[[devices]]
id = "drive"
type = "motor_controller"

[[devices]]
id = "counter"
type = "simple_test_device"
"#;

    fn parse(text: &str) -> DevHandlerConfig {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        DevHandlerConfig::load(file.path()).unwrap()
    }

    #[test]
    fn loads_full_file() {
        let config = parse(SAMPLE);
        config.validate().unwrap();
        assert_eq!(config.cycle_time(), Duration::from_millis(5));
        assert_eq!(config.region.name, "robot");
        assert_eq!(config.gamepad, GamepadConfig::default());
        assert_eq!(
            config.devices[1],
            DeviceEntry {
                id: "counter".to_string(),
                device_type: DeviceType::SimpleTestDevice,
            }
        );
    }

    #[test]
    fn defaults_apply() {
        let config = parse("[shared]\nservice_name = \"h\"\n");
        config.validate().unwrap();
        assert_eq!(config.cycle_time_us, DEFAULT_CYCLE_TIME_US);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn rejects_duplicates() {
        let mut config = parse(SAMPLE);
        config.devices.push(config.devices[0].clone());
        assert!(matches!(
            config.validate(),
            Err(HandlerError::DuplicateConfigDevice(id)) if id == "drive"
        ));
    }

    #[test]
    fn rejects_more_devices_than_capacity() {
        let mut config = parse(SAMPLE);
        for i in 0..3 {
            config.devices.push(DeviceEntry {
                id: format!("extra{i}"),
                device_type: DeviceType::Encoder,
            });
        }
        assert!(matches!(config.validate(), Err(HandlerError::Config(_))));
    }

    #[test]
    fn rejects_bad_cycle_and_ids() {
        let mut config = parse(SAMPLE);
        config.cycle_time_us = 10;
        assert!(config.validate().is_err());

        let mut config = parse(SAMPLE);
        config.devices[0].id = String::new();
        assert!(matches!(config.validate(), Err(HandlerError::Config(_))));
    }
}
