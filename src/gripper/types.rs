// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Messages of the gripper service protocol.
use serde::Deserialize;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::network::{CommandHeader, MessageCommand};

/// Protocol version spoken by [`TcpServiceHost`](`crate::server::TcpServiceHost`) and
/// [`GripperClient`](`crate::client::GripperClient`).
pub static GRIPPER_SERVICE_VERSION: u16 = 1;

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum GripperCommandEnum {
    Connect,
    GetServiceDefinition,
    GetJointPositions,
    SetJointCommand,
    CloseGrip,
    OpenGrip,
    ResetHand,
    SetGripShape,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success,
    Fail,
    InvalidArgument,
    UpstreamFailure,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct GripperCommandHeader {
    pub command: GripperCommandEnum,
    pub command_id: u32,
    pub size: u32,
}

impl GripperCommandHeader {
    pub fn new(command: GripperCommandEnum, command_id: u32, size: u32) -> GripperCommandHeader {
        GripperCommandHeader {
            command,
            command_id,
            size,
        }
    }
}

impl MessageCommand for GripperCommandHeader {
    fn get_command_message_id(&self) -> u32 {
        self.command_id
    }
}

impl CommandHeader for GripperCommandHeader {
    fn get_size(&self) -> u32 {
        self.size
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub version: u16,
    pub node_name: String,
    pub service_name: String,
}

impl ConnectRequest {
    pub fn new(node_name: &str, service_name: &str) -> Self {
        ConnectRequest {
            version: GRIPPER_SERVICE_VERSION,
            node_name: node_name.to_string(),
            service_name: service_name.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetJointCommandRequest {
    pub command: Vec<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetGripShapeRequest {
    pub shape: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestWithHeader<T> {
    pub header: GripperCommandHeader,
    pub request: T,
}

impl<T> MessageCommand for RequestWithHeader<T> {
    fn get_command_message_id(&self) -> u32 {
        self.header.get_command_message_id()
    }
}

pub type ConnectRequestWithHeader = RequestWithHeader<ConnectRequest>;
pub type SetJointCommandRequestWithHeader = RequestWithHeader<SetJointCommandRequest>;
pub type SetGripShapeRequestWithHeader = RequestWithHeader<SetGripShapeRequest>;

/// Answer to every request. `payload` is only set on success, `fault` only on failure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResponseWithHeader<T> {
    pub header: GripperCommandHeader,
    pub status: Status,
    pub fault: String,
    pub payload: Option<T>,
}

impl<T> MessageCommand for ResponseWithHeader<T> {
    fn get_command_message_id(&self) -> u32 {
        self.header.get_command_message_id()
    }
}

/// Carries the server's protocol version.
pub type ConnectResponse = ResponseWithHeader<u16>;
pub type ServiceDefinitionResponse = ResponseWithHeader<String>;
pub type JointPositionsResponse = ResponseWithHeader<[f64; 4]>;
pub type VoidResponse = ResponseWithHeader<()>;
