use crate::activation::{DriverPhase, DriverStatus};
use crate::command::{command_mailbox, CommandError, CommandMailbox, GripperCommand};
use crate::connection::{ConnectionError, ConnectionReport, ConnectionSupervisor};
use crate::control_loop::{ControlLoop, MessageBus};
use crate::gripper_config::{ConfigError, DeviceLayout, DriverConfig, LoopTiming};
use crate::transport::{DeviceIndex, GripperTransport, TransportFactory};
use std::sync::{atomic::AtomicBool, Arc};
use thiserror::Error;
use tokio::task;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("invalid driver configuration")]
    Config(#[from] ConfigError),
    #[error("failed to connect to grippers")]
    Connection(#[from] ConnectionError),
    #[error("control loop task failed")]
    LoopTask(#[from] task::JoinError),
}

type Result<T> = std::result::Result<T, DriverError>;

/// Handle to a running control loop.
pub struct GripperDriver {
    layout: DeviceLayout,
    mailbox: Arc<CommandMailbox>,
    status: Arc<DriverStatus>,
    connection_report: ConnectionReport,
    join_handle: task::JoinHandle<()>,
}

impl GripperDriver {
    /// Validate config, connect with retries, then spawn the control loop.
    ///
    /// Returns `DriverError::Connection` if shutdown was requested while
    /// still connecting, in which case no loop is started.
    pub async fn connect(
        factory: &dyn TransportFactory,
        bus: Arc<dyn MessageBus>,
        config: &DriverConfig,
        timing: LoopTiming,
        keep_running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let layout = config.validate()?;
        let supervisor =
            ConnectionSupervisor::new(factory, keep_running.clone(), timing.retry_backoff);
        let connection = supervisor.connect(config, layout).await?;
        let mut driver = Self::start(connection.transport, bus, layout, timing, keep_running);
        driver.connection_report = connection.report;
        Ok(driver)
    }

    /// Spawn the control loop on an already connected transport.
    pub fn start(
        transport: Box<dyn GripperTransport>,
        bus: Arc<dyn MessageBus>,
        layout: DeviceLayout,
        timing: LoopTiming,
        keep_running: Arc<AtomicBool>,
    ) -> Self {
        let (mailbox, inbox) = command_mailbox(&layout.devices());
        let status = Arc::new(DriverStatus::default());
        let control_loop = ControlLoop::new(
            transport,
            bus,
            inbox,
            layout,
            timing,
            keep_running,
            status.clone(),
        );
        let join_handle = tokio::spawn(control_loop.run());
        Self {
            layout,
            mailbox: Arc::new(mailbox),
            status,
            connection_report: ConnectionReport::default(),
            join_handle,
        }
    }

    pub fn layout(&self) -> DeviceLayout {
        self.layout
    }

    /// Shared sender for bus subscribers
    pub fn mailbox(&self) -> Arc<CommandMailbox> {
        self.mailbox.clone()
    }

    pub fn submit(
        &self,
        device: DeviceIndex,
        command: &GripperCommand,
    ) -> std::result::Result<(), CommandError> {
        self.mailbox.submit(device, command)
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn phase(&self) -> DriverPhase {
        self.status.phase()
    }

    pub fn connection_report(&self) -> ConnectionReport {
        self.connection_report
    }

    /// Wait for the loop to wind down after the keep running flag drops.
    pub async fn join(self) -> Result<()> {
        self.join_handle.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedTransportFactory;
    use crate::telemetry::{GripperStatus, JointState};
    use async_trait::async_trait;
    use std::sync::{atomic::Ordering, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Default)]
    struct PhaseRecorder {
        statuses: Mutex<Vec<(DeviceIndex, GripperStatus)>>,
    }

    #[async_trait]
    impl MessageBus for PhaseRecorder {
        async fn publish(&self, device: DeviceIndex, status: &GripperStatus, _joint: &JointState) {
            self.statuses.lock().unwrap().push((device, status.clone()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_device_count_never_connects() {
        let factory = SimulatedTransportFactory::new();
        let config = DriverConfig {
            device_count: 3,
            ..Default::default()
        };
        let result = GripperDriver::connect(
            &factory,
            Arc::new(PhaseRecorder::default()),
            &config,
            LoopTiming::default(),
            Arc::new(AtomicBool::new(true)),
        )
        .await;
        assert!(matches!(
            result,
            Err(DriverError::Config(ConfigError::UnsupportedDeviceCount(3)))
        ));
        assert_eq!(factory.open_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_failed_opens_then_activation() {
        let factory = SimulatedTransportFactory::failing_opens(2);
        let bus = Arc::new(PhaseRecorder::default());
        let keep_running = Arc::new(AtomicBool::new(true));
        let config = DriverConfig {
            device_count: 2,
            ..Default::default()
        };
        let driver = GripperDriver::connect(
            &factory,
            bus.clone(),
            &config,
            LoopTiming::default(),
            keep_running.clone(),
        )
        .await
        .unwrap();

        let report = driver.connection_report();
        assert_eq!(report.open_attempts, 3);
        assert_eq!(report.retries, 2);
        assert_eq!(report.logged_failures, 1);
        assert_eq!(report.suppressed_failures, 1);
        assert_eq!(report.liveness_passes, 1);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(driver.phase(), DriverPhase::Resetting);
        sleep(Duration::from_millis(225)).await;
        assert_eq!(driver.phase(), DriverPhase::Activating);
        sleep(Duration::from_millis(200)).await;
        assert!(driver.is_ready());

        driver
            .submit(DeviceIndex::RIGHT, &GripperCommand::goto(0.5, 255.0, 50.0))
            .unwrap();
        sleep(Duration::from_millis(500)).await;
        keep_running.store(false, Ordering::Relaxed);
        driver.join().await.unwrap();

        let statuses = bus.statuses.lock().unwrap();
        let right = statuses
            .iter()
            .filter(|(device, _)| *device == DeviceIndex::RIGHT)
            .last()
            .map(|(_, status)| status.clone())
            .unwrap();
        assert!((right.position - 0.5).abs() < 1e-9);
        let left = statuses
            .iter()
            .filter(|(device, _)| *device == DeviceIndex::LEFT)
            .last()
            .map(|(_, status)| status.clone())
            .unwrap();
        assert!(left.is_ready);
        assert!(left.position.abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_connect_starts_nothing() {
        let factory = SimulatedTransportFactory::failing_opens(u32::MAX);
        let keep_running = Arc::new(AtomicBool::new(true));
        let stopper = tokio::spawn({
            let keep_running = keep_running.clone();
            async move {
                sleep(Duration::from_millis(1500)).await;
                keep_running.store(false, Ordering::Relaxed);
            }
        });
        let result = GripperDriver::connect(
            &factory,
            Arc::new(PhaseRecorder::default()),
            &DriverConfig::default(),
            LoopTiming::default(),
            keep_running,
        )
        .await;
        stopper.await.unwrap();
        assert!(matches!(
            result,
            Err(DriverError::Connection(ConnectionError::Cancelled))
        ));
    }
}
