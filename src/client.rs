// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the GripperClient type.
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::device_data::DeviceData;
use crate::exception::{GripperException, GripperResult};
use crate::gripper::types::{
    ConnectRequest, ConnectResponse, GripperCommandEnum, GripperCommandHeader,
    JointPositionsResponse, RequestWithHeader, ResponseWithHeader, ServiceDefinitionResponse,
    SetGripShapeRequest, SetJointCommandRequest, Status, VoidResponse, GRIPPER_SERVICE_VERSION,
};
use crate::network::{encoded_size, Network};
use crate::server::service_url::ServiceUrl;

/// Calls a gripper service hosted by a [`TcpServiceHost`](`crate::server::TcpServiceHost`).
///
/// # Example
/// ```no_run
/// use gripper_bridge::{GripperClient, GripperResult};
/// fn main() -> GripperResult<()> {
///     let mut gripper =
///         GripperClient::connect("tcp://localhost:2354/GripperServer.left/Gripper")?;
///     gripper.set_grip_shape("sphere")?;
///     gripper.close_grip()?;
///     println!("{:?}", gripper.joint_positions()?);
///     Ok(())
/// }
/// ```
pub struct GripperClient {
    network: Network<GripperServiceData>,
    url: ServiceUrl,
    server_version: u16,
}

impl GripperClient {
    /// Establishes a connection with a gripper service.
    /// # Arguments
    /// * `url` - `tcp://<host>:<port>/<node name>/<service name>`
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::GripperException::InvalidArgument`) if the url is malformed.
    /// * [`NetworkException`](`crate::exception::GripperException::NetworkException`) if the connection cannot be established.
    /// * [`IncompatibleVersionError`](`crate::exception::GripperException::IncompatibleVersionError`) if the host speaks another protocol version.
    /// * [`CommandException`](`crate::exception::GripperException::CommandException`) if the host does not serve the requested node or service.
    pub fn connect(url: &str) -> GripperResult<GripperClient> {
        GripperClient::connect_to(url.parse()?)
    }

    pub fn connect_to(url: ServiceUrl) -> GripperResult<GripperClient> {
        let network = Network::new(&url.address())?;
        let mut client = GripperClient {
            network,
            url,
            server_version: 0,
        };
        let request = ConnectRequest::new(&client.url.node_name, &client.url.service_name);
        let response: ConnectResponse =
            client.send_and_receive(GripperCommandEnum::Connect, request)?;
        let status = response.status;
        match (status, response.payload) {
            (Status::Success, Some(version)) => {
                client.server_version = version;
                log::debug!("connected to {} (version {})", client.url, version);
                Ok(client)
            }
            (_, Some(version)) if version != GRIPPER_SERVICE_VERSION => {
                Err(GripperException::IncompatibleVersionError {
                    server_version: version,
                    library_version: GRIPPER_SERVICE_VERSION,
                })
            }
            (status, _) => Err(handle_failure(status, response.fault)),
        }
    }

    /// Live joint positions `[finger1, finger2, finger3, preshape]` of the hand. \[rad\]
    pub fn joint_positions(&mut self) -> GripperResult<[f64; 4]> {
        let command = GripperCommandEnum::GetJointPositions;
        let response: JointPositionsResponse = self.send_and_receive(command, ())?;
        handle_response(command, response)
    }

    /// Sends a joint command `[finger1, finger2, finger3, preshape]`.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::GripperException::InvalidArgument`) if the service
    /// rejects the command.
    pub fn set_joint_command(&mut self, command: &[f64]) -> GripperResult<()> {
        self.call_void(
            GripperCommandEnum::SetJointCommand,
            SetJointCommandRequest {
                command: command.to_vec(),
            },
        )
    }

    pub fn close_grip(&mut self) -> GripperResult<()> {
        self.call_void(GripperCommandEnum::CloseGrip, ())
    }

    pub fn open_grip(&mut self) -> GripperResult<()> {
        self.call_void(GripperCommandEnum::OpenGrip, ())
    }

    pub fn reset_hand(&mut self) -> GripperResult<()> {
        self.call_void(GripperCommandEnum::ResetHand, ())
    }

    /// Selects a preshape by name. Unknown names are ignored by the service.
    pub fn set_grip_shape(&mut self, shape: &str) -> GripperResult<()> {
        self.call_void(
            GripperCommandEnum::SetGripShape,
            SetGripShapeRequest {
                shape: shape.to_string(),
            },
        )
    }

    /// Returns the service definition text of the connected service.
    pub fn service_definition(&mut self) -> GripperResult<String> {
        let command = GripperCommandEnum::GetServiceDefinition;
        let response: ServiceDefinitionResponse = self.send_and_receive(command, ())?;
        handle_response(command, response)
    }

    /// Returns the protocol version reported by the host.
    pub fn server_version(&self) -> u16 {
        self.server_version
    }

    pub fn url(&self) -> &ServiceUrl {
        &self.url
    }

    /// Sets how long a call waits for its response. Defaults to 5 seconds.
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.network.set_response_timeout(timeout);
    }

    fn call_void<Req: Serialize>(
        &mut self,
        command: GripperCommandEnum,
        request: Req,
    ) -> GripperResult<()> {
        let response: VoidResponse = self.send_and_receive(command, request)?;
        handle_response(command, response)
    }

    fn send_and_receive<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        command: GripperCommandEnum,
        request: Req,
    ) -> GripperResult<ResponseWithHeader<Resp>> {
        let mut message = RequestWithHeader {
            header: self.network.create_header(command, 0),
            request,
        };
        message.header.size = encoded_size(&message)? as u32;
        let command_id = self.network.tcp_send_request(&message)?;
        self.network.tcp_blocking_receive_response(command_id)
    }
}

fn handle_response<T>(
    command: GripperCommandEnum,
    response: ResponseWithHeader<T>,
) -> GripperResult<T> {
    let status = response.status;
    match (status, response.payload) {
        (Status::Success, Some(payload)) => Ok(payload),
        (Status::Success, None) => Err(GripperException::NetworkException {
            message: format!("gripper-rr-bridge: response to {:?} carries no value", command),
        }),
        (status, _) => Err(handle_failure(status, response.fault)),
    }
}

fn handle_failure(status: Status, fault: String) -> GripperException {
    match status {
        Status::InvalidArgument => GripperException::InvalidArgument { message: fault },
        Status::UpstreamFailure => GripperException::UpstreamReadFailure { message: fault },
        Status::Success | Status::Fail => GripperException::CommandException { message: fault },
    }
}

pub(crate) struct GripperServiceData {}

impl DeviceData for GripperServiceData {
    type CommandHeader = GripperCommandHeader;
    type CommandEnum = GripperCommandEnum;

    fn create_header(
        command_id: &mut u32,
        command: Self::CommandEnum,
        size: usize,
    ) -> Self::CommandHeader {
        let header = GripperCommandHeader::new(command, *command_id, size as u32);
        *command_id += 1;
        header
    }

    fn get_library_version() -> u16 {
        GRIPPER_SERVICE_VERSION
    }
}
