use crate::error::{Result, WrapperError};
use async_trait::async_trait;
use gripper_controller::{
    command::{CommandMailbox, GripperCommand},
    control_loop::MessageBus,
    gripper_config::DeviceLayout,
    telemetry::{GripperStatus, JointState},
    transport::DeviceIndex,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zenoh::prelude::r#async::*;
use zenoh::publication::Publisher;

pub const COMMAND_TOPIC: &str = "cmd";
pub const STATUS_TOPIC: &str = "stat";
pub const JOINT_STATES_TOPIC: &str = "joint_states";

/// Full key expression for one of a device's topics.
pub fn topic(layout: DeviceLayout, device: DeviceIndex, name: &str) -> String {
    format!("{}/{}", layout.topic_prefix(device), name)
}

pub fn parse_command(payload: &str) -> Result<GripperCommand> {
    let command = serde_json::from_str(payload)?;
    Ok(command)
}

struct DevicePublishers {
    device: DeviceIndex,
    status: Publisher<'static>,
    joint_states: Publisher<'static>,
}

/// Publishes telemetry as JSON on the device's `stat` and `joint_states` keys.
pub struct ZenohMessageBus {
    publishers: Vec<DevicePublishers>,
}

impl ZenohMessageBus {
    pub async fn new(session: Arc<Session>, layout: DeviceLayout) -> Result<Self> {
        let mut publishers = Vec::with_capacity(layout.device_count());
        for device in layout.devices() {
            let status = session
                .declare_publisher(topic(layout, device, STATUS_TOPIC))
                .res()
                .await
                .map_err(WrapperError::ZenohError)?;
            let joint_states = session
                .declare_publisher(topic(layout, device, JOINT_STATES_TOPIC))
                .res()
                .await
                .map_err(WrapperError::ZenohError)?;
            publishers.push(DevicePublishers {
                device,
                status,
                joint_states,
            });
        }
        Ok(Self { publishers })
    }
}

#[async_trait]
impl MessageBus for ZenohMessageBus {
    async fn publish(&self, device: DeviceIndex, status: &GripperStatus, joint: &JointState) {
        let Some(publishers) = self
            .publishers
            .iter()
            .find(|publishers| publishers.device == device)
        else {
            warn!("No publishers declared for gripper {}", device);
            return;
        };
        match serde_json::to_string(status) {
            Ok(json) => {
                if let Err(err) = publishers.status.put(json).res().await {
                    warn!("Failed to publish status of gripper {}: {}", device, err);
                }
            }
            Err(err) => warn!("Failed to serialize status of gripper {}: {}", device, err),
        }
        match serde_json::to_string(joint) {
            Ok(json) => {
                if let Err(err) = publishers.joint_states.put(json).res().await {
                    warn!("Failed to publish joint state of gripper {}: {}", device, err);
                }
            }
            Err(err) => warn!(
                "Failed to serialize joint state of gripper {}: {}",
                device, err
            ),
        }
    }
}

/// Forward every `cmd` message into the device's mailbox slot.
///
/// Each device gets its own subscriber task. Malformed payloads are logged
/// and dropped.
pub async fn spawn_command_subscribers(
    session: Arc<Session>,
    layout: DeviceLayout,
    mailbox: Arc<CommandMailbox>,
    keep_running: Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(layout.device_count());
    for device in layout.devices() {
        let key = topic(layout, device, COMMAND_TOPIC);
        let subscriber = session
            .declare_subscriber(key.as_str())
            .res()
            .await
            .map_err(WrapperError::ZenohError)?;
        info!("Listening for gripper {} commands on {}", device, key);

        let mailbox = mailbox.clone();
        let keep_running = keep_running.clone();
        handles.push(tokio::spawn(async move {
            while keep_running.load(Ordering::Relaxed) {
                let sample = match subscriber.recv_async().await {
                    Ok(sample) => sample,
                    Err(err) => {
                        error!("Command subscriber for {} closed: {}", key, err);
                        break;
                    }
                };
                let payload = sample.value.to_string();
                match parse_command(&payload) {
                    Ok(command) => {
                        debug!("Gripper {} command {:?}", device, command);
                        if let Err(err) = mailbox.submit(device, &command) {
                            warn!("Dropping command for {}: {}", key, err);
                        }
                    }
                    Err(err) => warn!("Malformed command on {}: {}", key, err),
                }
            }
        }));
    }
    Ok(handles)
}
