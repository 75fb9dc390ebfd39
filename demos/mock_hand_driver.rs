// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use std::io::{Read, Write};
use std::mem::size_of;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bincode::{deserialize, serialize};
use clap::Parser;
use gripper_bridge::config::default_registry_dir;
use gripper_bridge::hand::types::{
    DisableTorqueResponse, HandCommandEnum, HandCommandHeader, HandConnectRequestWithHeader,
    HandConnectResponse, HandStatus, MotorPositionsResponse, PoseMessage, HAND_DRIVER_VERSION,
};
use gripper_bridge::registry::hand_param_key;
use gripper_bridge::signals::QuitSignals;
use gripper_bridge::{DirectoryRegistry, GripperException, GripperResult, NameRegistry};

/// Maximum joint speed of the simulated motors. [rad/s]
const JOINT_SPEED: f64 = 3.;

/// A simulated hand driver. It registers itself for a gripper name so that a gripper_host
/// can be started for the same name without hardware.
#[derive(Parser, Debug)]
#[clap(author, version, name = "mock_hand_driver")]
struct CommandLineArguments {
    /// Name of the gripper, e.g. left
    pub name: String,
    /// TCP port of the driver, 0 picks a free port
    #[clap(long, default_value_t = 0)]
    pub port: u16,
    /// Directory of the name registry
    #[clap(long)]
    pub registry_dir: Option<PathBuf>,
}

/// Motors that move towards their targets with [`JOINT_SPEED`].
struct SimulatedMotors {
    positions: [f64; 4],
    targets: [f64; 4],
    last_update: Instant,
    torque_enabled: bool,
}

impl SimulatedMotors {
    fn update(&mut self) {
        let now = Instant::now();
        let max_step = JOINT_SPEED * (now - self.last_update).as_secs_f64();
        self.last_update = now;
        if !self.torque_enabled {
            return;
        }
        for (position, target) in self.positions.iter_mut().zip(self.targets.iter()) {
            let delta = (target - *position).max(-max_step).min(max_step);
            *position += delta;
        }
    }
}

fn main() -> GripperResult<()> {
    let args = CommandLineArguments::parse();
    simple_log::quick_log_level::<_, &str>("info", None).map_err(|e| GripperException::ServiceException {
        message: e.to_string(),
    })?;
    let quit_signals = QuitSignals::block()?;

    let listener = TcpListener::bind(("127.0.0.1", args.port))?;
    let address = listener.local_addr()?;
    let udp_socket = UdpSocket::bind(("127.0.0.1", 0))?;
    let udp_port = udp_socket.local_addr()?.port();

    let registry = DirectoryRegistry::open(
        args.registry_dir.clone()
            .unwrap_or_else(default_registry_dir),
    )?;
    let key = hand_param_key(&args.name);
    let _claim = registry
        .claim(&key, &address.to_string())?
        .ok_or_else(|| GripperException::NameConflict {
            name: args.name.clone(),
        })?;

    let motors = Arc::new(Mutex::new(SimulatedMotors {
        positions: [0.; 4],
        targets: [0.; 4],
        last_update: Instant::now(),
        torque_enabled: true,
    }));
    let pose_motors = motors.clone();
    std::thread::spawn(move || receive_poses(udp_socket, pose_motors));
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let motors = motors.clone();
                    std::thread::spawn(move || {
                        if let Err(e) = serve(stream, udp_port, motors) {
                            log::warn!("{}", e);
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }
    });

    println!("hand driver {} listens on {} (poses on udp {})", key, address, udp_port);
    println!("press enter to quit ...");
    quit_signals.wait_for_quit();
    Ok(())
}

fn receive_poses(socket: UdpSocket, motors: Arc<Mutex<SimulatedMotors>>) {
    let mut buffer = [0_u8; 64];
    loop {
        let pose: PoseMessage = match socket.recv_from(&mut buffer) {
            Ok((num_bytes, _)) => match deserialize(&buffer[..num_bytes]) {
                Ok(pose) => pose,
                Err(e) => {
                    log::warn!("malformed pose: {}", e);
                    continue;
                }
            },
            Err(e) => {
                log::error!("udp receive failed: {}", e);
                return;
            }
        };
        log::info!("new targets {:?}", pose.q());
        let mut motors = motors.lock().unwrap();
        motors.update();
        motors.targets = pose.q();
    }
}

fn serve(
    mut stream: TcpStream,
    udp_port: u16,
    motors: Arc<Mutex<SimulatedMotors>>,
) -> GripperResult<()> {
    let mut bytes = vec![0_u8; size_of::<HandConnectRequestWithHeader>()];
    stream.read_exact(&mut bytes)?;
    let request: HandConnectRequestWithHeader = deserialize(&bytes)?;
    let version = request.request.version;
    let accepted = version == HAND_DRIVER_VERSION;
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
        version: HAND_DRIVER_VERSION,
        udp_port,
    };
    stream.write_all(&serialize(&response)?)?;
    if !accepted {
        log::warn!("refused client with version {}", version);
        return Ok(());
    }
    log::info!("gripper host connected");

    let mut header_bytes = vec![0_u8; size_of::<HandCommandHeader>()];
    while stream.read_exact(&mut header_bytes).is_ok() {
        let header: HandCommandHeader = deserialize(&header_bytes)?;
        let command = header.command;
        let reply = match command {
            HandCommandEnum::GetMotorPositions => {
                let mut motors = motors.lock().unwrap();
                motors.update();
                serialize(&MotorPositionsResponse {
                    header: HandCommandHeader::new(
                        command,
                        header.command_id,
                        size_of::<MotorPositionsResponse>() as u32,
                    ),
                    status: HandStatus::Success,
                    positions: motors.positions,
                })?
            }
            HandCommandEnum::DisableTorque => {
                log::info!("torque disabled");
                motors.lock().unwrap().torque_enabled = false;
                serialize(&DisableTorqueResponse {
                    header: HandCommandHeader::new(
                        command,
                        header.command_id,
                        size_of::<DisableTorqueResponse>() as u32,
                    ),
                    status: HandStatus::Success,
                })?
            }
            HandCommandEnum::Connect => {
                return Err(GripperException::CommandException {
                    message: "client connected twice".to_string(),
                })
            }
        };
        stream.write_all(&reply)?;
    }
    log::info!("gripper host disconnected");
    Ok(())
}
