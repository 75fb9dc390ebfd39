// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the ServiceHost trait and the TcpServiceHost type which makes gripper objects
//! reachable over the network.
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use serde::Serialize;

use crate::exception::{create_command_exception, GripperException, GripperResult};
use crate::gripper::types::{
    ConnectRequest, ConnectRequestWithHeader, GripperCommandEnum, GripperCommandHeader,
    ResponseWithHeader, SetGripShapeRequestWithHeader, SetJointCommandRequestWithHeader, Status,
    GRIPPER_SERVICE_VERSION,
};
use crate::gripper::GripperObject;
use crate::network::{
    deserialize, enable_keep_alive, encoded_size, read_available, serialize, take_frame,
};
use crate::server::service_definition::ServiceDefinition;
use crate::server::service_url::ServiceUrl;
use crate::utils::lock;

pub mod service_definition;
pub mod service_url;

const WAKER: Token = Token(0);
const FIRST_LISTENER: usize = 1;
const FIRST_CONNECTION: usize = 3;

/// Makes objects reachable for remote callers.
pub trait ServiceHost {
    /// Registers the types declared by a service definition text.
    fn register_service_type(&mut self, definition: &str) -> GripperResult<()>;
    /// Binds `object` to `name`. `service_type` has to be a registered qualified type.
    fn register_service(
        &mut self,
        name: &str,
        service_type: &str,
        object: Arc<dyn GripperObject>,
    ) -> GripperResult<()>;
    /// Starts accepting connections. Port 0 picks a free port.
    /// # Return
    /// The port the host listens on.
    fn start(&mut self, port: u16) -> GripperResult<u16>;
    fn stop(&mut self) -> GripperResult<()>;
}

#[derive(Clone)]
struct RegisteredService {
    name: String,
    object: Arc<dyn GripperObject>,
    definition: String,
}

type ServiceTable = Arc<Mutex<HashMap<String, RegisteredService>>>;

struct RunningServer {
    port: u16,
    waker: Arc<Waker>,
    stop_requested: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Serves registered objects over TCP.
///
/// All connections are handled by one background thread. Calls of one connection are executed
/// in order.
pub struct TcpServiceHost {
    node_name: String,
    service_types: HashMap<String, ServiceDefinition>,
    services: ServiceTable,
    running: Option<RunningServer>,
}

impl TcpServiceHost {
    /// Creates a host. Callers address it by `node_name`, e.g. `GripperServer.left`.
    pub fn new(node_name: &str) -> Self {
        TcpServiceHost {
            node_name: node_name.to_string(),
            service_types: HashMap::new(),
            services: Arc::new(Mutex::new(HashMap::new())),
            running: None,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Port the host listens on, None if it is not started.
    pub fn listen_port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.port)
    }

    /// Url under which `service_name` can be reached.
    /// # Arguments
    /// * `host` - host name or address callers use to reach this machine.
    pub fn connection_url(&self, host: &str, service_name: &str) -> GripperResult<ServiceUrl> {
        let port = self
            .listen_port()
            .ok_or_else(|| GripperException::ServiceException {
                message: "service host is not started".to_string(),
            })?;
        Ok(ServiceUrl::new(host, port, &self.node_name, service_name))
    }
}

impl ServiceHost for TcpServiceHost {
    fn register_service_type(&mut self, definition: &str) -> GripperResult<()> {
        let definition = ServiceDefinition::parse(definition)?;
        for service_type in definition.qualified_types() {
            log::debug!("registering service type {}", service_type);
            self.service_types.insert(service_type, definition.clone());
        }
        Ok(())
    }

    fn register_service(
        &mut self,
        name: &str,
        service_type: &str,
        object: Arc<dyn GripperObject>,
    ) -> GripperResult<()> {
        let definition = self.service_types.get(service_type).ok_or_else(|| {
            GripperException::ServiceException {
                message: format!("service type {} is not registered", service_type),
            }
        })?;
        let mut services = lock(&self.services);
        if services.contains_key(name) {
            return Err(GripperException::ServiceException {
                message: format!("a service named {} is already registered", name),
            });
        }
        services.insert(
            name.to_string(),
            RegisteredService {
                name: name.to_string(),
                object,
                definition: definition.text().to_string(),
            },
        );
        log::info!("registered service {} of type {}", name, service_type);
        Ok(())
    }

    fn start(&mut self, port: u16) -> GripperResult<u16> {
        if let Some(running) = &self.running {
            return Err(GripperException::ServiceException {
                message: format!("service host already listens on port {}", running.port),
            });
        }
        let std_listeners = bind_listeners(port)?;
        let port = std_listeners[0].local_addr()?.port();
        let poll = Poll::new()?;
        let mut listeners = Vec::with_capacity(std_listeners.len());
        for (index, std_listener) in std_listeners.into_iter().enumerate() {
            std_listener.set_nonblocking(true)?;
            let mut listener = TcpListener::from_std(std_listener);
            poll.registry().register(
                &mut listener,
                Token(FIRST_LISTENER + index),
                Interest::READABLE,
            )?;
            listeners.push(listener);
        }
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let stop_requested = Arc::new(AtomicBool::new(false));

        let server_loop = ServerLoop {
            poll,
            events: Events::with_capacity(128),
            listeners,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION,
            services: self.services.clone(),
            node_name: self.node_name.clone(),
            stop_requested: stop_requested.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("{}-host", self.node_name))
            .spawn(move || server_loop.run())?;
        log::info!("{} listens on port {}", self.node_name, port);
        self.running = Some(RunningServer {
            port,
            waker,
            stop_requested,
            thread,
        });
        Ok(port)
    }

    fn stop(&mut self) -> GripperResult<()> {
        let running = match self.running.take() {
            Some(running) => running,
            None => return Ok(()),
        };
        running.stop_requested.store(true, Ordering::SeqCst);
        running.waker.wake()?;
        running
            .thread
            .join()
            .map_err(|_| GripperException::ServiceException {
                message: "service host thread panicked".to_string(),
            })?;
        log::info!("{} stopped", self.node_name);
        Ok(())
    }
}

impl Drop for TcpServiceHost {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("could not stop {}: {}", self.node_name, e);
        }
    }
}

/// Binds the IPv6 and the IPv4 wildcard address on the same port.
///
/// A dual-stack IPv6 socket already accepts IPv4 connections, the IPv4 bind fails then.
fn bind_listeners(port: u16) -> GripperResult<Vec<StdTcpListener>> {
    let mut listeners = Vec::new();
    let mut port = port;
    match StdTcpListener::bind(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)) {
        Ok(listener) => {
            port = listener.local_addr()?.port();
            listeners.push(listener);
        }
        Err(e) => log::debug!("no IPv6 listener on port {}: {}", port, e),
    }
    match StdTcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)) {
        Ok(listener) => listeners.push(listener),
        Err(e) if !listeners.is_empty() => {
            log::debug!("IPv4 on port {} is served by the IPv6 listener: {}", port, e)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(listeners)
}

struct ServerLoop {
    poll: Poll,
    events: Events,
    listeners: Vec<TcpListener>,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    services: ServiceTable,
    node_name: String,
    stop_requested: Arc<AtomicBool>,
}

impl ServerLoop {
    fn run(mut self) {
        loop {
            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("{}: poll failed: {}", self.node_name, e);
                return;
            }
            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|event| {
                    (
                        event.token(),
                        event.is_readable() || event.is_read_closed() || event.is_error(),
                        event.is_writable(),
                    )
                })
                .collect();
            for (token, readable, writable) in ready {
                match token {
                    WAKER => {
                        if self.stop_requested.load(Ordering::SeqCst) {
                            return;
                        }
                    }
                    Token(index) if index < FIRST_CONNECTION => {
                        self.accept_connections(index - FIRST_LISTENER)
                    }
                    token => self.handle_connection(token, readable, writable),
                }
            }
        }
    }

    fn accept_connections(&mut self, listener: usize) {
        loop {
            let accepted = match self.listeners.get(listener) {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        log::warn!("could not register connection from {}: {}", peer, e);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        log::warn!("could not disable nagle for {}: {}", peer, e);
                    }
                    if let Err(e) = enable_keep_alive(&stream) {
                        log::warn!("could not enable keep alive for {}: {}", peer, e);
                    }
                    log::info!("{}: accepted connection from {}", self.node_name, peer);
                    self.connections
                        .insert(token, Connection::new(stream, peer));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("{}: could not accept connection: {}", self.node_name, e);
                    return;
                }
            }
        }
    }

    fn handle_connection(&mut self, token: Token, readable: bool, writable: bool) {
        let connection = match self.connections.get_mut(&token) {
            Some(connection) => connection,
            None => return,
        };
        let result = connection.handle_event(readable, writable, &self.services, &self.node_name);
        match result {
            Ok(true) => {
                let wants_write = connection.wants_write();
                if wants_write != connection.registered_writable {
                    let interest = if wants_write {
                        Interest::READABLE | Interest::WRITABLE
                    } else {
                        Interest::READABLE
                    };
                    match self
                        .poll
                        .registry()
                        .reregister(&mut connection.stream, token, interest)
                    {
                        Ok(()) => connection.registered_writable = wants_write,
                        Err(e) => {
                            log::warn!("{}: {}", connection.peer, e);
                            self.close_connection(token);
                        }
                    }
                }
            }
            Ok(false) => {
                log::info!("{}: {} disconnected", self.node_name, connection.peer);
                self.close_connection(token);
            }
            Err(e) => {
                log::warn!(
                    "{}: dropping connection from {}: {}",
                    self.node_name,
                    connection.peer,
                    e
                );
                self.close_connection(token);
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut connection) = self.connections.remove(&token) {
            if let Err(e) = self.poll.registry().deregister(&mut connection.stream) {
                log::debug!("could not deregister {}: {}", connection.peer, e);
            }
        }
    }
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    inbox: Vec<u8>,
    outbox: Vec<u8>,
    registered_writable: bool,
    read_closed: bool,
    service: Option<RegisteredService>,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Connection {
            stream,
            peer,
            inbox: Vec::new(),
            outbox: Vec::new(),
            registered_writable: false,
            read_closed: false,
            service: None,
        }
    }

    /// Reads and answers all complete requests.
    ///
    /// Requests that arrived before the caller shut down its sending side are still answered.
    /// # Return
    /// False once the caller stopped sending and all responses are written.
    fn handle_event(
        &mut self,
        readable: bool,
        writable: bool,
        services: &ServiceTable,
        node_name: &str,
    ) -> GripperResult<bool> {
        if readable && !self.read_closed {
            self.read_closed = !read_available(&mut self.stream, &mut self.inbox)?;
            while let Some((header, frame)) = take_frame::<GripperCommandHeader>(&mut self.inbox)? {
                let response = self.dispatch(header, &frame, services, node_name)?;
                self.outbox.extend_from_slice(&response);
            }
        }
        if readable || writable {
            self.flush()?;
        }
        Ok(!(self.read_closed && self.outbox.is_empty()))
    }

    fn wants_write(&self) -> bool {
        !self.outbox.is_empty()
    }

    fn flush(&mut self) -> GripperResult<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => {
                    return Err(GripperException::NetworkException {
                        message: "connection closed while sending".to_string(),
                    })
                }
                Ok(num_bytes) => {
                    self.outbox.drain(..num_bytes);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        header: GripperCommandHeader,
        frame: &[u8],
        services: &ServiceTable,
        node_name: &str,
    ) -> GripperResult<Vec<u8>> {
        let command = header.command;
        log::debug!("{}: {:?}", self.peer, command);
        match command {
            GripperCommandEnum::Connect => {
                let request: ConnectRequestWithHeader = deserialize(frame)?;
                let result = self.connect(&request.request, services, node_name);
                let (status, fault, version) = match result {
                    Ok(version) => (Status::Success, String::new(), version),
                    Err(e) => {
                        log::warn!("{}: connect refused: {}", self.peer, e);
                        (status_of(&e), e.to_string(), GRIPPER_SERVICE_VERSION)
                    }
                };
                encode_response(header, status, fault, Some(version))
            }
            GripperCommandEnum::GetServiceDefinition => respond(
                header,
                self.bound_service()
                    .map(|service| service.definition.clone()),
            ),
            GripperCommandEnum::GetJointPositions => respond(
                header,
                self.bound_service()
                    .and_then(|service| service.object.joint_positions()),
            ),
            GripperCommandEnum::SetJointCommand => {
                let request: SetJointCommandRequestWithHeader = deserialize(frame)?;
                respond(
                    header,
                    self.bound_service().and_then(|service| {
                        service.object.set_joint_command(&request.request.command)
                    }),
                )
            }
            GripperCommandEnum::CloseGrip => respond(
                header,
                self.bound_service()
                    .and_then(|service| service.object.close_grip()),
            ),
            GripperCommandEnum::OpenGrip => respond(
                header,
                self.bound_service()
                    .and_then(|service| service.object.open_grip()),
            ),
            GripperCommandEnum::ResetHand => respond(
                header,
                self.bound_service()
                    .and_then(|service| service.object.reset_hand()),
            ),
            GripperCommandEnum::SetGripShape => {
                let request: SetGripShapeRequestWithHeader = deserialize(frame)?;
                respond(
                    header,
                    self.bound_service()
                        .and_then(|service| service.object.set_grip_shape(&request.request.shape)),
                )
            }
        }
    }

    fn connect(
        &mut self,
        request: &ConnectRequest,
        services: &ServiceTable,
        node_name: &str,
    ) -> GripperResult<u16> {
        if request.version != GRIPPER_SERVICE_VERSION {
            return Err(GripperException::IncompatibleVersionError {
                server_version: GRIPPER_SERVICE_VERSION,
                library_version: request.version,
            });
        }
        if request.node_name != node_name {
            return Err(GripperException::ServiceException {
                message: format!(
                    "this is node {}, not {}",
                    node_name, request.node_name
                ),
            });
        }
        let service = lock(services)
            .get(&request.service_name)
            .cloned()
            .ok_or_else(|| GripperException::ServiceException {
                message: format!("unknown service {}", request.service_name),
            })?;
        log::info!("{}: connected to service {}", self.peer, service.name);
        self.service = Some(service);
        Ok(GRIPPER_SERVICE_VERSION)
    }

    fn bound_service(&self) -> GripperResult<&RegisteredService> {
        self.service.as_ref().ok_or_else(|| {
            create_command_exception("gripper-rr-bridge: connect to a service before calling it")
        })
    }
}

fn status_of(error: &GripperException) -> Status {
    match error {
        GripperException::InvalidArgument { .. } => Status::InvalidArgument,
        GripperException::UpstreamReadFailure { .. } => Status::UpstreamFailure,
        _ => Status::Fail,
    }
}

fn respond<T: Serialize>(
    header: GripperCommandHeader,
    result: GripperResult<T>,
) -> GripperResult<Vec<u8>> {
    match result {
        Ok(payload) => encode_response(header, Status::Success, String::new(), Some(payload)),
        Err(e) => {
            log::debug!("call failed: {}", e);
            encode_response::<T>(header, status_of(&e), e.to_string(), None)
        }
    }
}

fn encode_response<T: Serialize>(
    request_header: GripperCommandHeader,
    status: Status,
    fault: String,
    payload: Option<T>,
) -> GripperResult<Vec<u8>> {
    let mut response = ResponseWithHeader {
        header: GripperCommandHeader::new(request_header.command, request_header.command_id, 0),
        status,
        fault,
        payload,
    };
    response.header.size = encoded_size(&response)? as u32;
    serialize(&response)
}
