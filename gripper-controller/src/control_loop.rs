use crate::activation::{ActivationStateMachine, DriverPhase, DriverStatus, PhaseAction};
use crate::command::{apply_command, CommandInbox, PendingCommand};
use crate::gripper_config::{DeviceLayout, LoopTiming};
use crate::telemetry::{DeviceState, GripperStatus, JointState};
use crate::transport::{self, DeviceIndex, GripperTransport, TransportError};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::SystemTime;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Where status and joint samples go every tick.
///
/// Fire and forget, implementations deal with their own delivery errors.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, device: DeviceIndex, status: &GripperStatus, joint_state: &JointState);
}

/// Everything the loop mutates, owned by the loop task alone.
#[derive(Debug)]
pub struct DriverContext {
    pub machine: ActivationStateMachine,
    pub devices: Vec<DeviceState>,
    pub started: Instant,
}

impl DriverContext {
    pub fn new(layout: DeviceLayout, timing: &LoopTiming, started: Instant) -> Self {
        Self {
            machine: ActivationStateMachine::new(timing.reset_guard),
            devices: layout
                .devices()
                .into_iter()
                .map(|device| DeviceState::new(device, started))
                .collect(),
            started,
        }
    }
}

/// Result of one tick
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub failures: Vec<(DeviceIndex, TransportError)>,
    pub published: Vec<DeviceIndex>,
}

pub struct ControlLoop {
    transport: Box<dyn GripperTransport>,
    bus: Arc<dyn MessageBus>,
    inbox: CommandInbox,
    context: DriverContext,
    layout: DeviceLayout,
    timing: LoopTiming,
    keep_running: Arc<AtomicBool>,
    status: Arc<DriverStatus>,
}

impl ControlLoop {
    pub fn new(
        transport: Box<dyn GripperTransport>,
        bus: Arc<dyn MessageBus>,
        inbox: CommandInbox,
        layout: DeviceLayout,
        timing: LoopTiming,
        keep_running: Arc<AtomicBool>,
        status: Arc<DriverStatus>,
    ) -> Self {
        Self {
            transport,
            bus,
            inbox,
            context: DriverContext::new(layout, &timing, Instant::now()),
            layout,
            timing,
            keep_running,
            status,
        }
    }

    pub fn phase(&self) -> DriverPhase {
        self.context.machine.phase()
    }

    fn should_run(&self) -> bool {
        self.keep_running.load(Ordering::Relaxed)
    }

    /// Tick at the configured rate until shutdown, then close the transport.
    pub async fn run(mut self) {
        let started = Instant::now();
        self.context = DriverContext::new(self.layout, &self.timing, started);
        let mut interval = time::interval(self.timing.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !self.should_run() {
                break;
            }
            self.tick(Instant::now()).await;
        }
        info!("Shutting down gripper driver");
        self.transport.shutdown().await;
    }

    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        let elapsed = now.saturating_duration_since(self.context.started);
        let all_ready = self
            .context
            .devices
            .iter()
            .all(|state| self.transport.is_ready(state.device));
        let action = self.context.machine.step(elapsed, all_ready);
        self.status.publish(self.context.machine.phase());

        let stamp = SystemTime::now();
        let mut outcome = TickOutcome::default();
        for state in self.context.devices.iter_mut() {
            let device = state.device;
            let command = self.inbox.latest(device);
            if let Err(err) = service_device(self.transport.as_mut(), device, action, command).await
            {
                if self.keep_running.load(Ordering::Relaxed) {
                    error!("Gripper {} communication error: {}", device, err);
                } else {
                    info!("Shutting down gripper driver");
                }
                outcome.failures.push((device, err));
            }

            let readings = self.transport.readings(device);
            let status = state.build_status(&readings, stamp);
            let joint_state = state.build_joint_state(readings.position, now, stamp);
            self.bus.publish(device, &status, &joint_state).await;
            outcome.published.push(device);
        }
        debug!(?action, failures = outcome.failures.len(), "tick done");
        outcome
    }
}

/// One gripper's share of a tick, failures stay inside this boundary.
async fn service_device(
    transport: &mut dyn GripperTransport,
    device: DeviceIndex,
    action: PhaseAction,
    command: Option<PendingCommand>,
) -> transport::Result<()> {
    match action {
        PhaseAction::Deactivate => transport.deactivate(device).await?,
        PhaseAction::Activate => transport.activate(device).await?,
        PhaseAction::ForwardCommands => {
            if let Some(command) = command {
                apply_command(transport, device, &command).await?;
            }
        }
    }
    transport.poll(device).await
}
