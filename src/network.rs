// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Framed TCP messaging shared by the gripper service, its clients and the hand driver link.
//!
//! Every message starts with a fixed size header which carries the total message size.
//! Messages are encoded with bincode.
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::mem::size_of;
use std::net::TcpStream as StdTcpStream;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt::{KeepAlive, TcpKeepCount, TcpKeepIdle, TcpKeepInterval};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::device_data::DeviceData;
use crate::exception::{GripperException, GripperResult};

const CLIENT: Token = Token(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest message (header included) a peer may announce. \[bytes\]
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Time a client waits for the response to a request.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

pub trait MessageCommand {
    fn get_command_message_id(&self) -> u32;
}

pub trait CommandHeader: MessageCommand + Serialize + DeserializeOwned + Copy + Debug {
    /// Size of the whole message (header included) in bytes.
    fn get_size(&self) -> u32;
}

/// Client side of a framed TCP connection to a device.
pub(crate) struct Network<D: DeviceData> {
    tcp_socket: TcpStream,
    command_id: u32,
    pending_response: Vec<u8>,
    received_responses: HashMap<u32, Vec<u8>>,
    closed: bool,
    response_timeout: Duration,
    poll_read: Poll,
    events: Events,
    device: PhantomData<D>,
}

impl<D: DeviceData> Network<D> {
    /// Connects to `address` (`host:port`), trying every address the host name resolves to.
    pub fn new(address: &str) -> GripperResult<Network<D>> {
        let std_socket = connect_any(&resolve_addresses(address)?)?;
        std_socket.set_nodelay(true)?;
        std_socket.set_nonblocking(true)?;
        let mut tcp_socket = TcpStream::from_std(std_socket);
        enable_keep_alive(&tcp_socket)?;

        let poll_read = Poll::new()?;
        poll_read
            .registry()
            .register(&mut tcp_socket, CLIENT, Interest::READABLE)?;
        Ok(Network {
            tcp_socket,
            command_id: 0,
            pending_response: Vec::new(),
            received_responses: HashMap::new(),
            closed: false,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_read,
            events: Events::with_capacity(128),
            device: PhantomData,
        })
    }

    /// Address the connection was established with.
    pub fn peer_address(&self) -> GripperResult<SocketAddr> {
        Ok(self.tcp_socket.peer_addr()?)
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    pub fn create_header(&mut self, command: D::CommandEnum, size: usize) -> D::CommandHeader {
        D::create_header(&mut self.command_id, command, size)
    }

    pub fn tcp_send_request<T: Serialize + MessageCommand>(
        &mut self,
        request: &T,
    ) -> GripperResult<u32> {
        let encoded_request = serialize(request)?;
        write_all_nonblocking(&mut self.tcp_socket, &encoded_request)?;
        Ok(request.get_command_message_id())
    }

    /// Blocks until a Response message with the given command ID has been received and returns this
    /// response.
    ///
    /// # Arguments
    /// * `command_id` - Expected command ID of the Response.
    /// # Errors
    /// * [`NetworkException`](`crate::exception::GripperException::NetworkException`) if the
    /// connection is closed or no response arrives within the response timeout.
    pub fn tcp_blocking_receive_response<T: DeserializeOwned>(
        &mut self,
        command_id: u32,
    ) -> GripperResult<T> {
        let response_bytes = self.wait_for_response_to_arrive(command_id)?;
        deserialize(&response_bytes)
    }

    /// Responses to requests older than `command_id` arrived after their caller gave up and are
    /// dropped here.
    fn wait_for_response_to_arrive(&mut self, command_id: u32) -> GripperResult<Vec<u8>> {
        let deadline = Instant::now() + self.response_timeout;
        loop {
            if let Some(response_bytes) = self.received_responses.remove(&command_id) {
                self.received_responses.retain(|id, _| *id > command_id);
                return Ok(response_bytes);
            }
            if self.closed {
                return Err(GripperException::NetworkException {
                    message: "gripper-rr-bridge: connection closed by remote side".to_string(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                self.received_responses.retain(|id, _| *id > command_id);
                return Err(GripperException::NetworkException {
                    message: format!(
                        "gripper-rr-bridge: timeout while waiting for response to command {}",
                        command_id
                    ),
                });
            }
            self.tcp_read_from_buffer(Duration::min(deadline - now, Duration::from_millis(10)))?;
        }
    }

    fn tcp_read_from_buffer(&mut self, timeout: Duration) -> GripperResult<()> {
        match self.poll_read.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let readable = self
            .events
            .iter()
            .any(|event| event.token() == CLIENT && event.is_readable());
        if !readable {
            return Ok(());
        }
        let open = read_available(&mut self.tcp_socket, &mut self.pending_response)?;
        while let Some((header, frame)) =
            take_frame::<D::CommandHeader>(&mut self.pending_response)?
        {
            self.received_responses
                .insert(header.get_command_message_id(), frame);
        }
        self.closed = !open;
        Ok(())
    }
}

/// Resolves a `host:port` string to all of its addresses.
pub fn resolve_addresses(address: &str) -> GripperResult<Vec<SocketAddr>> {
    let addresses: Vec<SocketAddr> = address.to_socket_addrs()?.collect();
    if addresses.is_empty() {
        return Err(GripperException::NetworkException {
            message: format!("gripper-rr-bridge: could not resolve {}", address),
        });
    }
    Ok(addresses)
}

/// Connects to the first address that accepts the connection.
/// # Errors
/// * [`NetworkException`](`crate::exception::GripperException::NetworkException`) with the error
/// of the last address if none accepts.
pub(crate) fn connect_any(addresses: &[SocketAddr]) -> GripperResult<StdTcpStream> {
    let mut last_error = None;
    for address in addresses {
        match StdTcpStream::connect_timeout(address, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("could not connect to {}: {}", address, e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => GripperException::NetworkException {
            message: "gripper-rr-bridge: no address to connect to".to_string(),
        },
    })
}

/// Reads everything currently available on a non-blocking reader into `buffer`.
/// Returns false once the remote side has closed the connection.
pub(crate) fn read_available<R: Read>(reader: &mut R, buffer: &mut Vec<u8>) -> GripperResult<bool> {
    let mut chunk = [0_u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(false),
            Ok(num_bytes) => buffer.extend_from_slice(&chunk[..num_bytes]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Removes the first complete message from `buffer`.
///
/// # Return
/// * the decoded header and the bytes of the whole message (header included)
/// * None if the buffer does not yet hold a complete message
pub(crate) fn take_frame<H: CommandHeader>(
    buffer: &mut Vec<u8>,
) -> GripperResult<Option<(H, Vec<u8>)>> {
    let header_size = size_of::<H>();
    if buffer.len() < header_size {
        return Ok(None);
    }
    let header: H = deserialize(&buffer[..header_size])?;
    let message_size = header.get_size() as usize;
    if message_size < header_size {
        return Err(GripperException::NetworkException {
            message: format!(
                "gripper-rr-bridge: message announces {} bytes but the header alone has {} bytes",
                message_size, header_size
            ),
        });
    }
    if message_size > MAX_MESSAGE_SIZE {
        return Err(GripperException::NetworkException {
            message: format!(
                "gripper-rr-bridge: message announces {} bytes, at most {} are allowed",
                message_size, MAX_MESSAGE_SIZE
            ),
        });
    }
    if buffer.len() < message_size {
        return Ok(None);
    }
    let frame: Vec<u8> = buffer.drain(..message_size).collect();
    Ok(Some((header, frame)))
}

/// Writes all bytes to a non-blocking writer, yielding while the socket buffer is full.
pub(crate) fn write_all_nonblocking<W: Write>(writer: &mut W, bytes: &[u8]) -> GripperResult<()> {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        match writer.write(remaining) {
            Ok(0) => {
                return Err(GripperException::NetworkException {
                    message: "gripper-rr-bridge: connection closed while sending".to_string(),
                })
            }
            Ok(num_bytes) => remaining = &remaining[num_bytes..],
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                std::thread::yield_now()
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub(crate) fn enable_keep_alive<S: AsRawFd>(socket: &S) -> GripperResult<()> {
    let fd = socket.as_raw_fd();
    setsockopt(fd, KeepAlive, &true)?;
    setsockopt(fd, TcpKeepIdle, &1)?;
    setsockopt(fd, TcpKeepCount, &3)?;
    setsockopt(fd, TcpKeepInterval, &1)?;
    Ok(())
}

/// Number of bytes `message` occupies on the wire.
pub(crate) fn encoded_size<T: Serialize>(message: &T) -> GripperResult<usize> {
    Ok(bincode::serialized_size(message)? as usize)
}

pub(crate) fn serialize<T: Serialize>(s: &T) -> GripperResult<Vec<u8>> {
    Ok(bincode::serialize(s)?)
}

pub(crate) fn deserialize<T: DeserializeOwned>(encoded: &[u8]) -> GripperResult<T> {
    Ok(bincode::deserialize(encoded)?)
}
