use anyhow::Result;
use clap::Parser;
use gripper_controller::{
    connection::ConnectionError,
    driver::{DriverError, GripperDriver},
    gripper_config::{DriverConfig, LoopTiming},
    simulator::SimulatedTransportFactory,
};
use gripper_zenoh::{
    error::WrapperError,
    logging,
    zenoh_bus::{spawn_command_subscribers, ZenohMessageBus},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info};
use zenoh::prelude::r#async::*;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Driver configuration file in yaml
    #[arg(long)]
    config: Option<String>,

    /// Number of grippers on the bus, 1 or 2
    #[arg(long)]
    device_count: Option<u8>,

    /// Serial port to use
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Zenoh endpoints to connect to
    #[arg(long)]
    connect: Vec<zenoh_config::EndPoint>,

    /// Zenoh endpoints to listen on
    #[arg(long)]
    listen: Vec<zenoh_config::EndPoint>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log as json lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::load_yaml(path)?,
            None => DriverConfig::default(),
        };
        if let Some(device_count) = self.device_count {
            config.device_count = device_count;
        }
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose, args.json_logs);

    let config = args.driver_config()?;
    let layout = match config.validate() {
        Ok(layout) => layout,
        Err(err) => {
            error!("Refusing to start: {}", err);
            return Err(err.into());
        }
    };

    let keep_running = Arc::new(AtomicBool::new(true));
    tokio::spawn({
        let keep_running = keep_running.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for Ctrl+c: {}", err);
            } else {
                info!("Detected Ctrl+c");
            }
            keep_running.store(false, Ordering::Relaxed);
        }
    });

    let mut zenoh_config = zenoh::config::Config::default();
    if !args.listen.is_empty() {
        zenoh_config.listen.endpoints = args.listen.clone();
    }
    if !args.connect.is_empty() {
        zenoh_config.connect.endpoints = args.connect.clone();
    }
    let session = zenoh::open(zenoh_config)
        .res()
        .await
        .map_err(WrapperError::ZenohError)?
        .into_arc();

    let bus = Arc::new(ZenohMessageBus::new(session.clone(), layout).await?);

    info!("Connecting to {} simulated gripper(s) on {}", layout.device_count(), config.port);
    let factory = SimulatedTransportFactory::new();
    let driver = match GripperDriver::connect(
        &factory,
        bus,
        &config,
        LoopTiming::default(),
        keep_running.clone(),
    )
    .await
    {
        Ok(driver) => driver,
        Err(DriverError::Connection(ConnectionError::Cancelled)) => {
            info!("Shutdown before grippers connected");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let subscribers = spawn_command_subscribers(
        session.clone(),
        driver.layout(),
        driver.mailbox(),
        keep_running.clone(),
    )
    .await?;

    driver.join().await?;
    for subscriber in subscribers {
        subscriber.abort();
    }
    info!("Gripper driver stopped");
    Ok(())
}
