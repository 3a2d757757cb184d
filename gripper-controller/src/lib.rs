//! Lifecycle and control loop for one or two serial parallel grippers.
//!
//! The transport and the message bus are traits, see [`transport::GripperTransport`]
//! and [`control_loop::MessageBus`].

pub mod activation;
pub mod command;
pub mod connection;
pub mod control_loop;
pub mod driver;
pub mod gripper_config;
pub mod simulator;
pub mod telemetry;
pub mod transport;
