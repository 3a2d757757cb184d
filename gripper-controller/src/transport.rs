use crate::gripper_config::DriverConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("error while talking to serial port")]
    IoError(#[from] std::io::Error),
    #[error("gripper {0} did not respond")]
    Timeout(DeviceIndex),
    #[error("gripper {0} is not attached to this transport")]
    UnknownDevice(DeviceIndex),
    #[error("unable to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },
    #[error("transport was shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Address of one gripper on the shared bus.
///
/// Index 0 is the single gripper or the left one, index 1 is the right one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIndex(u8);

impl DeviceIndex {
    pub const LEFT: DeviceIndex = DeviceIndex(0);
    pub const RIGHT: DeviceIndex = DeviceIndex(1);

    pub fn new(index: u8) -> Option<DeviceIndex> {
        match index {
            0 | 1 => Some(DeviceIndex(index)),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Motion request as handed to the transport
///
/// position 0.0 is fully open, 1.0 is fully closed
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GotoTarget {
    pub position: f64,
    pub speed: f64,
    pub force: f64,
}

impl GotoTarget {
    pub fn new(position: f64, speed: f64, force: f64) -> GotoTarget {
        GotoTarget {
            position,
            speed,
            force,
        }
    }
}

/// Last known state of a gripper as cached by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceReadings {
    pub is_ready: bool,
    pub is_reset: bool,
    pub is_moving: bool,
    pub object_detected: bool,
    pub fault_status: u8,
    pub position: f64,
    pub requested_position: f64,
    pub current: f64,
}

/// Command and query surface of the gripper bus.
///
/// Command calls only stage registers, `poll` performs the exchange with
/// the device. Queries are answered from the readings cached by the last
/// successful poll.
#[async_trait]
pub trait GripperTransport: Send {
    async fn activate(&mut self, device: DeviceIndex) -> Result<()>;
    async fn deactivate(&mut self, device: DeviceIndex) -> Result<()>;
    async fn activate_emergency_release(
        &mut self,
        device: DeviceIndex,
        open_direction: bool,
    ) -> Result<()>;
    async fn deactivate_emergency_release(&mut self, device: DeviceIndex) -> Result<()>;
    async fn stop(&mut self, device: DeviceIndex) -> Result<()>;
    async fn goto(&mut self, device: DeviceIndex, target: GotoTarget) -> Result<()>;
    async fn poll(&mut self, device: DeviceIndex) -> Result<()>;
    fn readings(&self, device: DeviceIndex) -> DeviceReadings;
    /// Terminal, calling it twice is harmless
    async fn shutdown(&mut self);

    fn is_ready(&self, device: DeviceIndex) -> bool {
        self.readings(device).is_ready
    }
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, config: &DriverConfig) -> Result<Box<dyn GripperTransport>>;
}
