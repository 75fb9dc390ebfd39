// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the link to the hand driver.
//!
//! The hand driver is a separate process that talks to the motors. It answers position
//! queries and torque commands over TCP and receives joint targets as UDP datagrams.
use std::mem::size_of;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use mio::net::UdpSocket;
#[cfg(test)]
use mockall::automock;

use crate::device_data::DeviceData;
use crate::exception::{create_command_exception, GripperException, GripperResult};
use crate::hand::types::{
    DisableTorqueRequestWithHeader, DisableTorqueResponse, GetMotorPositionsRequestWithHeader,
    HandCommandEnum, HandCommandHeader, HandConnectRequest, HandConnectRequestWithHeader,
    HandConnectResponse, HandStatus, MotorPositionsResponse, PoseMessage, HAND_DRIVER_VERSION,
};
use crate::network::{serialize, Network};

pub mod types;

/// Reports live motor positions and controls the motor torque of a hand.
#[cfg_attr(test, automock)]
pub trait HandDriver: Send {
    /// Current positions `[finger1, finger2, finger3, preshape]`. \[rad\]
    fn get_motor_positions(&mut self) -> GripperResult<[f64; 4]>;
    /// Disables the motor torque. The hand cannot be commanded afterwards.
    fn disable_torque(&mut self) -> GripperResult<()>;
}

/// One-way sink for joint targets.
#[cfg_attr(test, automock)]
pub trait CommandChannel: Send {
    fn publish(&mut self, pose: &PoseMessage) -> GripperResult<()>;
}

/// Maintains a network connection to a hand driver process.
pub struct NetworkHandDriver {
    network: Network<HandData>,
    address: SocketAddr,
    udp_port: u16,
    server_version: u16,
}

impl NetworkHandDriver {
    /// Establishes a connection with a hand driver.
    /// # Arguments
    /// * `address` - `host:port` of the hand driver.
    /// # Errors
    /// * [`NetworkException`](`crate::exception::GripperException::NetworkException`) if the connection cannot be established, e.g. after a timeout.
    /// * [`IncompatibleVersionError`](`crate::exception::GripperException::IncompatibleVersionError`) if the driver speaks another protocol version.
    pub fn connect(address: &str) -> GripperResult<NetworkHandDriver> {
        let mut network: Network<HandData> = Network::new(address)?;
        let address = network.peer_address()?;
        let connect_command = HandConnectRequestWithHeader {
            header: network.create_header(
                HandCommandEnum::Connect,
                size_of::<HandConnectRequestWithHeader>(),
            ),
            request: HandConnectRequest {
                version: HandData::get_library_version(),
            },
        };
        let command_id = network.tcp_send_request(&connect_command)?;
        let connect_response: HandConnectResponse =
            network.tcp_blocking_receive_response(command_id)?;
        let status = connect_response.status;
        let server_version = connect_response.version;
        match status {
            HandStatus::Success => {
                log::debug!(
                    "connected to hand driver at {} (version {})",
                    address,
                    server_version
                );
                Ok(NetworkHandDriver {
                    network,
                    address,
                    udp_port: connect_response.udp_port,
                    server_version,
                })
            }
            HandStatus::Fail => Err(GripperException::IncompatibleVersionError {
                server_version,
                library_version: HandData::get_library_version(),
            }),
        }
    }

    /// Opens the channel on which the driver receives joint targets.
    pub fn command_channel(&self) -> GripperResult<UdpCommandChannel> {
        UdpCommandChannel::new(SocketAddr::new(self.address.ip(), self.udp_port))
    }

    /// Returns the protocol version reported by the connected driver.
    pub fn server_version(&self) -> u16 {
        self.server_version
    }
}

impl HandDriver for NetworkHandDriver {
    fn get_motor_positions(&mut self) -> GripperResult<[f64; 4]> {
        let command: GetMotorPositionsRequestWithHeader = self.network.create_header(
            HandCommandEnum::GetMotorPositions,
            size_of::<GetMotorPositionsRequestWithHeader>(),
        );
        let response: MotorPositionsResponse = self
            .network
            .tcp_send_request(&command)
            .and_then(|command_id| self.network.tcp_blocking_receive_response(command_id))
            .map_err(|e| GripperException::UpstreamReadFailure {
                message: e.to_string(),
            })?;
        let status = response.status;
        match status {
            HandStatus::Success => Ok(response.positions),
            HandStatus::Fail => Err(GripperException::UpstreamReadFailure {
                message: "hand driver could not read the motor positions".to_string(),
            }),
        }
    }

    fn disable_torque(&mut self) -> GripperResult<()> {
        let command: DisableTorqueRequestWithHeader = self.network.create_header(
            HandCommandEnum::DisableTorque,
            size_of::<DisableTorqueRequestWithHeader>(),
        );
        let command_id = self.network.tcp_send_request(&command)?;
        let response: DisableTorqueResponse =
            self.network.tcp_blocking_receive_response(command_id)?;
        let status = response.status;
        match status {
            HandStatus::Success => Ok(()),
            HandStatus::Fail => Err(create_command_exception(
                "gripper-rr-bridge hand: disabling torque failed!",
            )),
        }
    }
}

/// Publishes [`PoseMessage`]s as UDP datagrams. Nothing is acknowledged.
pub struct UdpCommandChannel {
    udp_socket: UdpSocket,
    target: SocketAddr,
}

impl UdpCommandChannel {
    pub fn new(target: SocketAddr) -> GripperResult<UdpCommandChannel> {
        let unspecified = match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let udp_socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
        Ok(UdpCommandChannel { udp_socket, target })
    }
}

impl CommandChannel for UdpCommandChannel {
    fn publish(&mut self, pose: &PoseMessage) -> GripperResult<()> {
        let bytes_send = self.udp_socket.send_to(&serialize(pose)?, self.target)?;
        if bytes_send != size_of::<PoseMessage>() {
            return Err(GripperException::NetworkException {
                message: "gripper-rr-bridge: UDP pose could not be sent".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) struct HandData {}

impl DeviceData for HandData {
    type CommandHeader = HandCommandHeader;
    type CommandEnum = HandCommandEnum;

    fn create_header(
        command_id: &mut u32,
        command: Self::CommandEnum,
        size: usize,
    ) -> Self::CommandHeader {
        let header = HandCommandHeader::new(command, *command_id, size as u32);
        *command_id += 1;
        header
    }

    fn get_library_version() -> u16 {
        HAND_DRIVER_VERSION
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::mem::size_of;
    use std::net::{TcpListener, UdpSocket};
    use std::thread::JoinHandle;
    use std::time::Duration;

    use bincode::{deserialize, serialize};

    use crate::exception::GripperException;
    use crate::hand::types::{
        DisableTorqueResponse, HandCommandEnum, HandCommandHeader, HandConnectRequestWithHeader,
        HandConnectResponse, HandStatus, MotorPositionsResponse, PoseMessage, HAND_DRIVER_VERSION,
    };
    use crate::hand::{CommandChannel, HandDriver, NetworkHandDriver};

    struct HandMockServer {
        listener: TcpListener,
        version: u16,
        udp_port: u16,
        positions: [f64; 4],
    }

    impl HandMockServer {
        fn new(version: u16, udp_port: u16, positions: [f64; 4]) -> Self {
            HandMockServer {
                listener: TcpListener::bind("127.0.0.1:0").unwrap(),
                version,
                udp_port,
                positions,
            }
        }

        fn address(&self) -> String {
            format!("127.0.0.1:{}", self.listener.local_addr().unwrap().port())
        }

        /// Serves one client and returns the commands it sent after connecting.
        fn spawn(self) -> JoinHandle<Vec<HandCommandEnum>> {
            std::thread::spawn(move || {
                let (mut socket, _) = self.listener.accept().unwrap();
                let mut bytes = vec![0_u8; size_of::<HandConnectRequestWithHeader>()];
                socket.read_exact(&mut bytes).unwrap();
                let request: HandConnectRequestWithHeader = deserialize(&bytes).unwrap();
                let requested_version = request.request.version;
                let accepted = requested_version == self.version;
                let response = HandConnectResponse {
                    header: HandCommandHeader::new(
                        HandCommandEnum::Connect,
                        request.header.command_id,
                        size_of::<HandConnectResponse>() as u32,
                    ),
                    status: if accepted {
                        HandStatus::Success
                    } else {
                        HandStatus::Fail
                    },
                    version: self.version,
                    udp_port: self.udp_port,
                };
                socket.write_all(&serialize(&response).unwrap()).unwrap();

                let mut commands = Vec::new();
                let mut header_bytes = vec![0_u8; size_of::<HandCommandHeader>()];
                while accepted && socket.read_exact(&mut header_bytes).is_ok() {
                    let header: HandCommandHeader = deserialize(&header_bytes).unwrap();
                    let command = header.command;
                    let reply = match command {
                        HandCommandEnum::GetMotorPositions => serialize(&MotorPositionsResponse {
                            header: HandCommandHeader::new(
                                command,
                                header.command_id,
                                size_of::<MotorPositionsResponse>() as u32,
                            ),
                            status: HandStatus::Success,
                            positions: self.positions,
                        }),
                        HandCommandEnum::DisableTorque => serialize(&DisableTorqueResponse {
                            header: HandCommandHeader::new(
                                command,
                                header.command_id,
                                size_of::<DisableTorqueResponse>() as u32,
                            ),
                            status: HandStatus::Success,
                        }),
                        HandCommandEnum::Connect => panic!("connected twice"),
                    }
                    .unwrap();
                    socket.write_all(&reply).unwrap();
                    commands.push(command);
                }
                commands
            })
        }
    }

    #[test]
    fn hand_driver_reads_positions_and_disables_torque() {
        let server = HandMockServer::new(HAND_DRIVER_VERSION, 0, [0.5, 1.0, 1.5, 2.5]);
        let address = server.address();
        let thread = server.spawn();
        {
            let mut hand = NetworkHandDriver::connect(&address).expect("hand driver failure");
            assert_eq!(hand.server_version(), HAND_DRIVER_VERSION);
            assert_eq!(hand.get_motor_positions().unwrap(), [0.5, 1.0, 1.5, 2.5]);
            hand.disable_torque().unwrap();
        }
        let commands = thread.join().unwrap();
        assert_eq!(
            commands,
            vec![
                HandCommandEnum::GetMotorPositions,
                HandCommandEnum::DisableTorque
            ]
        );
    }

    #[test]
    fn incompatible_hand_driver() {
        let server = HandMockServer::new(HAND_DRIVER_VERSION + 1, 0, [0.; 4]);
        let address = server.address();
        let thread = server.spawn();
        let result = NetworkHandDriver::connect(&address);
        thread.join().unwrap();
        match result {
            Err(GripperException::IncompatibleVersionError {
                server_version,
                library_version,
            }) => {
                assert_eq!(server_version, HAND_DRIVER_VERSION + 1);
                assert_eq!(library_version, HAND_DRIVER_VERSION);
            }
            Ok(_) => panic!("Expected incompatible version"),
            Err(e) => panic!("Expected incompatible version but found {:?}", e),
        }
    }

    #[test]
    fn missing_hand_driver_is_a_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        match NetworkHandDriver::connect(&format!("127.0.0.1:{}", port)) {
            Err(GripperException::NetworkException { .. }) => {}
            Ok(_) => panic!("Expected a network error"),
            Err(e) => panic!("Expected a network error but found {:?}", e),
        }
    }

    #[test]
    fn command_channel_publishes_poses() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let udp_port = receiver.local_addr().unwrap().port();
        let server = HandMockServer::new(HAND_DRIVER_VERSION, udp_port, [0.; 4]);
        let address = server.address();
        let thread = server.spawn();
        {
            let hand = NetworkHandDriver::connect(&address).unwrap();
            let mut channel = hand.command_channel().unwrap();
            let pose = PoseMessage {
                f1: 4.6,
                f2: 4.6,
                f3: 4.6,
                preshape: 0.,
            };
            channel.publish(&pose).unwrap();

            let mut buffer = [0_u8; 64];
            let (num_bytes, _) = receiver.recv_from(&mut buffer).unwrap();
            assert_eq!(num_bytes, size_of::<PoseMessage>());
            let received: PoseMessage = deserialize(&buffer[..num_bytes]).unwrap();
            assert_eq!(received, pose);
        }
        thread.join().unwrap();
    }
}
