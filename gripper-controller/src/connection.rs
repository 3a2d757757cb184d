use crate::gripper_config::{DeviceLayout, DriverConfig};
use crate::transport::{GripperTransport, TransportFactory};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("shutdown requested while connecting to gripper")]
    Cancelled,
}

/// How the connection went, mostly useful for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionReport {
    pub open_attempts: u32,
    pub liveness_passes: u32,
    /// back-off sleeps across both stages
    pub retries: u32,
    pub logged_failures: u32,
    pub suppressed_failures: u32,
}

pub struct Connection {
    pub transport: Box<dyn GripperTransport>,
    pub report: ConnectionReport,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("report", &self.report)
            .finish()
    }
}

/// Keeps opening the transport until it and every gripper answer.
pub struct ConnectionSupervisor<'a> {
    factory: &'a dyn TransportFactory,
    keep_running: Arc<AtomicBool>,
    retry_backoff: Duration,
}

impl<'a> ConnectionSupervisor<'a> {
    pub fn new(
        factory: &'a dyn TransportFactory,
        keep_running: Arc<AtomicBool>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            factory,
            keep_running,
            retry_backoff,
        }
    }

    fn should_run(&self) -> bool {
        self.keep_running.load(Ordering::Relaxed)
    }

    pub async fn connect(
        &self,
        config: &DriverConfig,
        layout: DeviceLayout,
    ) -> Result<Connection, ConnectionError> {
        let mut report = ConnectionReport::default();

        let mut printed = false;
        let mut transport = loop {
            if !self.should_run() {
                info!("Shutdown while connecting to gripper");
                return Err(ConnectionError::Cancelled);
            }
            report.open_attempts += 1;
            match self.factory.open(config).await {
                Ok(transport) => break transport,
                Err(err) => {
                    if printed {
                        report.suppressed_failures += 1;
                    } else {
                        error!(
                            "Unable to open port {} while connecting to gripper: {}. Will keep trying...",
                            config.port, err
                        );
                        report.logged_failures += 1;
                        printed = true;
                    }
                }
            }
            report.retries += 1;
            sleep(self.retry_backoff).await;
        };

        let mut printed = false;
        loop {
            if !self.should_run() {
                info!("Shutdown while connecting to gripper");
                transport.shutdown().await;
                return Err(ConnectionError::Cancelled);
            }
            report.liveness_passes += 1;
            let mut connected = true;
            // every gripper gets probed even after one failed
            for device in layout.devices() {
                if let Err(err) = transport.poll(device).await {
                    connected = false;
                    if printed {
                        report.suppressed_failures += 1;
                    } else {
                        error!(
                            "Failed to contact gripper {}: {}. Will keep trying...",
                            device, err
                        );
                        report.logged_failures += 1;
                    }
                }
            }
            if connected {
                break;
            }
            printed = true;
            report.retries += 1;
            sleep(self.retry_backoff).await;
        }

        info!("Gripper driver(s) connected successfully.");
        Ok(Connection { transport, report })
    }
}
