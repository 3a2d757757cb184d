use crate::transport::{self, DeviceIndex, GotoTarget, GripperTransport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

pub const POSITION_LIMITS: (f64, f64) = (0.0, 1.0);
pub const SPEED_LIMITS: (f64, f64) = (0.0, 255.0);
pub const FORCE_LIMITS: (f64, f64) = (0.0, 225.0);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("no gripper {0} on this driver")]
    UnknownDevice(DeviceIndex),
}

/// Command message as it arrives from the bus.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperCommand {
    pub emergency_release: bool,
    /// true releases towards open
    pub emergency_release_dir: bool,
    pub stop: bool,
    pub position: f64,
    pub speed: f64,
    pub force: f64,
}

impl GripperCommand {
    pub fn goto(position: f64, speed: f64, force: f64) -> Self {
        Self {
            position,
            speed,
            force,
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            stop: true,
            ..Default::default()
        }
    }

    pub fn emergency_release(open_direction: bool) -> Self {
        Self {
            emergency_release: true,
            emergency_release_dir: open_direction,
            ..Default::default()
        }
    }
}

/// The action a gripper keeps receiving until a newer command replaces it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingCommand {
    EmergencyRelease { open_direction: bool },
    Stop,
    Goto(GotoTarget),
}

impl From<&GripperCommand> for PendingCommand {
    /// Emergency release wins over stop, stop wins over goto
    fn from(command: &GripperCommand) -> Self {
        if command.emergency_release {
            PendingCommand::EmergencyRelease {
                open_direction: command.emergency_release_dir,
            }
        } else if command.stop {
            PendingCommand::Stop
        } else {
            PendingCommand::Goto(GotoTarget::new(
                command.position,
                command.speed,
                command.force,
            ))
        }
    }
}

/// Saturate into `[lower, upper]`. NaN saturates to the lower bound.
pub fn clamp_cmd(value: f64, (lower, upper): (f64, f64)) -> f64 {
    if value.is_nan() {
        lower
    } else {
        value.clamp(lower, upper)
    }
}

impl GotoTarget {
    pub fn clamped(&self) -> GotoTarget {
        GotoTarget::new(
            clamp_cmd(self.position, POSITION_LIMITS),
            clamp_cmd(self.speed, SPEED_LIMITS),
            clamp_cmd(self.force, FORCE_LIMITS),
        )
    }
}

/// Forward one pending command to the transport.
///
/// Emergency release is a level: every call without it clears the release
/// before stop or goto are staged.
pub async fn apply_command(
    transport: &mut dyn GripperTransport,
    device: DeviceIndex,
    command: &PendingCommand,
) -> transport::Result<()> {
    match command {
        PendingCommand::EmergencyRelease { open_direction } => {
            transport
                .activate_emergency_release(device, *open_direction)
                .await
        }
        PendingCommand::Stop => {
            transport.deactivate_emergency_release(device).await?;
            transport.stop(device).await
        }
        PendingCommand::Goto(target) => {
            transport.deactivate_emergency_release(device).await?;
            transport.goto(device, target.clamped()).await
        }
    }
}

/// Write side of the per device command slots.
///
/// Each slot holds one command, a newer submit replaces whatever the
/// control loop has not looked at yet.
#[derive(Debug)]
pub struct CommandMailbox {
    slots: Vec<(DeviceIndex, watch::Sender<Option<PendingCommand>>)>,
}

/// Read side, owned by the control loop.
#[derive(Debug)]
pub struct CommandInbox {
    slots: Vec<(DeviceIndex, watch::Receiver<Option<PendingCommand>>)>,
}

pub fn command_mailbox(devices: &[DeviceIndex]) -> (CommandMailbox, CommandInbox) {
    let (senders, receivers): (Vec<_>, Vec<_>) = devices
        .iter()
        .map(|device| {
            let (sender, receiver) = watch::channel(None);
            ((*device, sender), (*device, receiver))
        })
        .unzip();
    (
        CommandMailbox { slots: senders },
        CommandInbox { slots: receivers },
    )
}

impl CommandMailbox {
    /// Never blocks on the control loop
    pub fn submit(
        &self,
        device: DeviceIndex,
        command: &GripperCommand,
    ) -> Result<(), CommandError> {
        let (_, sender) = self
            .slots
            .iter()
            .find(|(index, _)| *index == device)
            .ok_or(CommandError::UnknownDevice(device))?;
        sender.send_replace(Some(PendingCommand::from(command)));
        Ok(())
    }
}

impl CommandInbox {
    pub fn latest(&self, device: DeviceIndex) -> Option<PendingCommand> {
        self.slots
            .iter()
            .find(|(index, _)| *index == device)
            .and_then(|(_, receiver)| *receiver.borrow())
    }
}
