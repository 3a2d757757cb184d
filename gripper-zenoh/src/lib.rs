pub mod error;
pub mod logging;
pub mod zenoh_bus;
