// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # gripper-rr-bridge
//! gripper-rr-bridge makes a three-finger robotic hand remotely callable. It connects to the
//! process that drives the motors of the hand (the hand driver) and serves a small gripper
//! interface over TCP.
//!
//! **THE HAND MOVES AS SOON AS A CALL ARRIVES. KEEP THE WORKSPACE OF THE FINGERS CLEAR!**
//!
//! ## Design
//! The library is divided into these modules:
//! * [gripper](`crate::gripper`) - the GripperService which caches the joint command and
//!   implements the grip presets.
//! * [hand](`crate::hand`) - the link to the hand driver: a TCP connection for motor positions
//!   and torque and a UDP channel for joint targets.
//! * [server](`crate::server`) - the ServiceHost which serves gripper objects to remote callers.
//! * [client](`crate::client`) - a client for the served gripper interface.
//! * [registry](`crate::registry`) - the name registry used to find hand drivers and to make sure
//!   only one host runs per hand.
//!
//! The `gripper_host` binary puts all of this together.
//!
//! # Example:
//!```no_run
//! use std::sync::Arc;
//! use gripper_bridge::{
//!     GripperResult, GripperService, NetworkHandDriver, ServiceHost, TcpServiceHost,
//!     SERVICE_DEFINITION, SERVICE_NAME, SERVICE_TYPE,
//! };
//! fn main() -> GripperResult<()> {
//!     let hand = NetworkHandDriver::connect("localhost:5170")?;
//!     let channel = hand.command_channel()?;
//!     let service = Arc::new(GripperService::new("left", hand, channel));
//!     let mut host = TcpServiceHost::new("GripperServer.left");
//!     host.register_service_type(SERVICE_DEFINITION)?;
//!     host.start(0)?;
//!     host.register_service(SERVICE_NAME, SERVICE_TYPE, service.clone())?;
//!     println!("{}", host.connection_url("localhost", SERVICE_NAME)?);
//!     // serve until the process is asked to quit
//!     host.stop()?;
//!     service.shutdown()
//! }
//! ```
//! The host serves calls on a background thread. Every call that changes the joint command
//! publishes the complete command to the hand driver.
//!
//! On the other side a [`GripperClient`] calls the service:
//! ```no_run
//! # use gripper_bridge::{GripperClient, GripperResult};
//! # fn main() -> GripperResult<()> {
//! let mut gripper = GripperClient::connect("tcp://localhost:2354/GripperServer.left/Gripper")?;
//! gripper.set_grip_shape("pinch")?;
//! gripper.close_grip()?;
//! # Ok(())
//! # }
//! ```
//! Both functions return a GripperResult. Errors of the hand, like a failed position read, are
//! forwarded to the caller.
pub mod client;
pub mod config;
mod device_data;
pub mod exception;
pub mod gripper;
pub mod hand;
mod network;
pub mod registry;
pub mod server;
pub mod signals;
mod utils;

pub use client::GripperClient;
pub use config::HostConfig;
pub use exception::{GripperException, GripperResult};
pub use gripper::joint_command::{GripShape, Joint, JointCommand};
pub use gripper::{GripperObject, GripperService, SERVICE_DEFINITION, SERVICE_NAME, SERVICE_TYPE};
pub use hand::types::PoseMessage;
pub use hand::{CommandChannel, HandDriver, NetworkHandDriver, UdpCommandChannel};
pub use network::DEFAULT_RESPONSE_TIMEOUT;
pub use registry::{DirectoryRegistry, NameRegistry, RegistryClaim};
pub use server::service_url::ServiceUrl;
pub use server::{ServiceHost, TcpServiceHost};
