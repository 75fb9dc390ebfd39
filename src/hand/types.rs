// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Messages exchanged with the hand driver process.

use serde::Deserialize;
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::gripper::joint_command::JointCommand;
use crate::network::{CommandHeader, MessageCommand};

pub static HAND_DRIVER_VERSION: u16 = 1;

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum HandCommandEnum {
    Connect,
    GetMotorPositions,
    DisableTorque,
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum HandStatus {
    Success,
    Fail,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct HandCommandHeader {
    pub command: HandCommandEnum,
    pub command_id: u32,
    pub size: u32,
}

impl HandCommandHeader {
    pub fn new(command: HandCommandEnum, command_id: u32, size: u32) -> HandCommandHeader {
        HandCommandHeader {
            command,
            command_id,
            size,
        }
    }
}

impl MessageCommand for HandCommandHeader {
    fn get_command_message_id(&self) -> u32 {
        self.command_id
    }
}

impl CommandHeader for HandCommandHeader {
    fn get_size(&self) -> u32 {
        self.size
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct HandConnectRequest {
    pub version: u16,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct HandConnectRequestWithHeader {
    pub header: HandCommandHeader,
    pub request: HandConnectRequest,
}

impl MessageCommand for HandConnectRequestWithHeader {
    fn get_command_message_id(&self) -> u32 {
        self.header.get_command_message_id()
    }
}

pub type GetMotorPositionsRequestWithHeader = HandCommandHeader;
pub type DisableTorqueRequestWithHeader = HandCommandHeader;

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct HandConnectResponse {
    pub header: HandCommandHeader,
    pub status: HandStatus,
    pub version: u16,
    /// Port on which the driver receives [`PoseMessage`]s.
    pub udp_port: u16,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct MotorPositionsResponse {
    pub header: HandCommandHeader,
    pub status: HandStatus,
    pub positions: [f64; 4],
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
#[repr(packed)]
pub struct DisableTorqueResponse {
    pub header: HandCommandHeader,
    pub status: HandStatus,
}

/// Joint targets published to the hand control loop.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct PoseMessage {
    pub f1: f64,
    pub f2: f64,
    pub f3: f64,
    pub preshape: f64,
}

impl From<JointCommand> for PoseMessage {
    fn from(command: JointCommand) -> Self {
        let [f1, f2, f3, preshape] = command.q();
        PoseMessage {
            f1,
            f2,
            f3,
            preshape,
        }
    }
}

impl PoseMessage {
    pub fn q(&self) -> [f64; 4] {
        [self.f1, self.f2, self.f3, self.preshape]
    }
}
