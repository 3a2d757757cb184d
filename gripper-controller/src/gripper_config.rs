use crate::transport::DeviceIndex;
use serde::{Deserialize, Serialize};
use std::{fs, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("number of grippers not supported: {0} (needs to be 1 or 2)")]
    UnsupportedDeviceCount(u8),
    #[error("error while accessing configuration")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    JsonError(#[from] serde_json::Error),
    #[error("error while parsing yaml")]
    YamlError(#[from] serde_yaml::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub device_count: u8,
    pub port: String,
    pub baud: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            device_count: 1,
            port: String::from("/dev/ttyUSB0"),
            baud: 115_200,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<DeviceLayout> {
        match self.device_count {
            1 => Ok(DeviceLayout::Single),
            2 => Ok(DeviceLayout::Dual),
            other => Err(ConfigError::UnsupportedDeviceCount(other)),
        }
    }

    pub fn parse_json(text: &str) -> Result<DriverConfig> {
        let config: DriverConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<DriverConfig> {
        let config: DriverConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn load_json(path: &str) -> Result<DriverConfig> {
        let text = fs::read_to_string(path)?;
        DriverConfig::parse_json(&text)
    }

    pub fn load_yaml(path: &str) -> Result<DriverConfig> {
        let text = fs::read_to_string(path)?;
        DriverConfig::parse_yaml(&text)
    }
}

/// Validated device count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLayout {
    Single,
    Dual,
}

impl DeviceLayout {
    pub fn devices(&self) -> Vec<DeviceIndex> {
        match self {
            DeviceLayout::Single => vec![DeviceIndex::LEFT],
            DeviceLayout::Dual => vec![DeviceIndex::LEFT, DeviceIndex::RIGHT],
        }
    }

    pub fn device_count(&self) -> usize {
        match self {
            DeviceLayout::Single => 1,
            DeviceLayout::Dual => 2,
        }
    }

    /// Topic namespace for a device, `gripper` when alone and
    /// `left_gripper`/`right_gripper` when paired.
    pub fn topic_prefix(&self, device: DeviceIndex) -> &'static str {
        match (self, device.index()) {
            (DeviceLayout::Single, _) => "gripper",
            (DeviceLayout::Dual, 0) => "left_gripper",
            (DeviceLayout::Dual, _) => "right_gripper",
        }
    }
}

/// Timing of the control loop and the connection retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTiming {
    /// tick period, 100 Hz by default
    pub period: Duration,
    /// how long grippers are held in reset after the loop starts
    pub reset_guard: Duration,
    pub retry_backoff: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        LoopTiming {
            period: Duration::from_millis(10),
            reset_guard: Duration::from_millis(500),
            retry_backoff: Duration::from_secs(1),
        }
    }
}
