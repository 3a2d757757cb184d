use crate::gripper_config::DriverConfig;
use crate::transport::{
    DeviceIndex, DeviceReadings, GotoTarget, GripperTransport, Result, TransportError,
    TransportFactory,
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

/// Polls needed after `activate` before a simulated gripper reports ready
pub const ACTIVATION_POLLS: u32 = 5;
/// Finger travel per poll at full speed
const MAX_STEP_PER_POLL: f64 = 0.02;
/// Fault reported while an emergency release is active
const FAULT_RELEASING: u8 = 0x0B;
const FAULT_RELEASE_COMPLETED: u8 = 0x0F;

#[derive(Debug, Clone, Default)]
struct SimulatedGripper {
    activated: bool,
    activation_progress: u32,
    emergency_release: Option<bool>,
    goto: Option<GotoTarget>,
    readings: DeviceReadings,
}

impl SimulatedGripper {
    fn new() -> Self {
        Self {
            readings: DeviceReadings {
                is_reset: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn step(&mut self) {
        let readings = &mut self.readings;
        if !self.activated {
            self.activation_progress = 0;
            readings.is_ready = false;
            readings.is_reset = true;
            readings.is_moving = false;
            readings.fault_status = 0;
            readings.current = 0.0;
            return;
        }
        if let Some(open_direction) = self.emergency_release {
            let limit = if open_direction { 0.0 } else { 1.0 };
            readings.requested_position = limit;
            readings.position = move_towards(readings.position, limit, MAX_STEP_PER_POLL / 4.0);
            readings.is_moving = readings.position != limit;
            readings.fault_status = if readings.is_moving {
                FAULT_RELEASING
            } else {
                FAULT_RELEASE_COMPLETED
            };
            return;
        }
        if !readings.is_ready {
            self.activation_progress += 1;
            readings.is_reset = false;
            readings.is_ready = self.activation_progress >= ACTIVATION_POLLS;
            return;
        }
        if let Some(target) = self.goto {
            readings.requested_position = target.position;
            let step = MAX_STEP_PER_POLL * (target.speed / 255.0).max(0.05);
            let next = move_towards(readings.position, target.position, step);
            readings.is_moving = next != target.position;
            readings.position = next;
            readings.current = if readings.is_moving {
                target.force / 225.0 * 0.5
            } else {
                0.0
            };
        }
    }
}

fn move_towards(current: f64, target: f64, max_step: f64) -> f64 {
    let distance = target - current;
    if distance.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(distance)
    }
}

/// Flip a gripper between reachable and unreachable at runtime.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    unreachable: Arc<Vec<AtomicBool>>,
}

impl FaultInjector {
    pub fn set_unreachable(&self, device: DeviceIndex, unreachable: bool) {
        if let Some(flag) = self.unreachable.get(device.index()) {
            flag.store(unreachable, Ordering::Release);
        }
    }

    fn is_unreachable(&self, device: DeviceIndex) -> bool {
        self.unreachable
            .get(device.index())
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

/// In memory stand in for the gripper bus.
pub struct SimulatedGripperTransport {
    grippers: Vec<SimulatedGripper>,
    faults: FaultInjector,
    closed: bool,
}

impl SimulatedGripperTransport {
    pub fn new(device_count: usize) -> Self {
        Self {
            grippers: vec![SimulatedGripper::new(); device_count],
            faults: FaultInjector {
                unreachable: Arc::new((0..device_count).map(|_| AtomicBool::new(false)).collect()),
            },
            closed: false,
        }
    }

    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn gripper(&mut self, device: DeviceIndex) -> Result<&mut SimulatedGripper> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.faults.is_unreachable(device) {
            return Err(TransportError::Timeout(device));
        }
        self.grippers
            .get_mut(device.index())
            .ok_or(TransportError::UnknownDevice(device))
    }
}

#[async_trait]
impl GripperTransport for SimulatedGripperTransport {
    async fn activate(&mut self, device: DeviceIndex) -> Result<()> {
        self.gripper(device)?.activated = true;
        Ok(())
    }

    async fn deactivate(&mut self, device: DeviceIndex) -> Result<()> {
        let gripper = self.gripper(device)?;
        gripper.activated = false;
        gripper.goto = None;
        gripper.emergency_release = None;
        Ok(())
    }

    async fn activate_emergency_release(
        &mut self,
        device: DeviceIndex,
        open_direction: bool,
    ) -> Result<()> {
        self.gripper(device)?.emergency_release = Some(open_direction);
        Ok(())
    }

    async fn deactivate_emergency_release(&mut self, device: DeviceIndex) -> Result<()> {
        self.gripper(device)?.emergency_release = None;
        Ok(())
    }

    async fn stop(&mut self, device: DeviceIndex) -> Result<()> {
        let gripper = self.gripper(device)?;
        gripper.goto = None;
        gripper.readings.requested_position = gripper.readings.position;
        gripper.readings.is_moving = false;
        Ok(())
    }

    async fn goto(&mut self, device: DeviceIndex, target: GotoTarget) -> Result<()> {
        self.gripper(device)?.goto = Some(target);
        Ok(())
    }

    async fn poll(&mut self, device: DeviceIndex) -> Result<()> {
        self.gripper(device)?.step();
        Ok(())
    }

    fn readings(&self, device: DeviceIndex) -> DeviceReadings {
        self.grippers
            .get(device.index())
            .map(|gripper| gripper.readings)
            .unwrap_or_default()
    }

    async fn shutdown(&mut self) {
        if !self.closed {
            tracing::debug!("Simulated gripper transport closed");
        }
        self.closed = true;
    }
}

/// Opens simulated transports, optionally refusing the first few attempts.
#[derive(Debug, Default)]
pub struct SimulatedTransportFactory {
    failures_left: AtomicU32,
    open_attempts: AtomicU32,
}

impl SimulatedTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_opens(count: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(count),
            open_attempts: AtomicU32::new(0),
        }
    }

    pub fn open_attempts(&self) -> u32 {
        self.open_attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TransportFactory for SimulatedTransportFactory {
    async fn open(&self, config: &DriverConfig) -> Result<Box<dyn GripperTransport>> {
        self.open_attempts.fetch_add(1, Ordering::AcqRel);
        let refused = self
            .failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::OpenFailed {
                port: config.port.clone(),
                reason: String::from("simulated open failure"),
            });
        }
        Ok(Box::new(SimulatedGripperTransport::new(
            config.device_count as usize,
        )))
    }
}
