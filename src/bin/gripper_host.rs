// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gripper_bridge::config::{default_registry_dir, DEFAULT_HOST, DEFAULT_LOG_LEVEL};
use gripper_bridge::registry::{claim_gripper_name, validate_gripper_name};
use gripper_bridge::signals::QuitSignals;
use gripper_bridge::{
    DirectoryRegistry, GripperException, GripperResult, GripperService, HostConfig,
    NetworkHandDriver, ServiceHost, TcpServiceHost, SERVICE_DEFINITION, SERVICE_NAME,
    SERVICE_TYPE,
};

/// Serves a three-finger hand as remotely callable gripper.
#[derive(Parser, Debug)]
#[clap(author, version, name = "gripper_host")]
struct CommandLineArguments {
    /// Name of the gripper, e.g. left
    pub name: String,
    /// Port of the service, 0 picks a free port
    #[clap(long, default_value_t = 0)]
    pub port: u16,
    /// Directory of the name registry shared with the hand driver
    #[clap(long)]
    pub registry_dir: Option<PathBuf>,
    /// Host name advertised in the connection url
    #[clap(long, default_value = DEFAULT_HOST)]
    pub host: String,
    /// One of trace, debug, info, warn, error
    #[clap(long, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

impl From<CommandLineArguments> for HostConfig {
    fn from(args: CommandLineArguments) -> Self {
        HostConfig {
            name: args.name,
            port: args.port,
            host: args.host,
            registry_dir: args.registry_dir.unwrap_or_else(default_registry_dir),
            log_level: args.log_level,
        }
    }
}

fn main() {
    let config: HostConfig = CommandLineArguments::parse().into();
    setup_logging(&config.log_level);
    let quit_signals = match QuitSignals::block() {
        Ok(quit_signals) => quit_signals,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(-1);
        }
    };
    if let Err(e) = run(&config, &quit_signals) {
        eprintln!("{}", e);
        std::process::exit(-1);
    }
}

fn run(config: &HostConfig, quit_signals: &QuitSignals) -> GripperResult<()> {
    let registry = DirectoryRegistry::open(&config.registry_dir)?;
    let hand_address = validate_gripper_name(&registry, &config.name)?;
    let claim = claim_gripper_name(&registry, &config.name, &config.node_name())?;

    let hand = NetworkHandDriver::connect(&hand_address).map_err(|e| {
        GripperException::ServiceNotReady {
            name: config.name.clone(),
            message: format!("hand driver at {} is not reachable: {}", hand_address, e),
        }
    })?;
    let channel = hand.command_channel()?;
    let service = Arc::new(GripperService::new(&config.name, hand, channel));

    let mut host = TcpServiceHost::new(&config.node_name());
    host.register_service_type(SERVICE_DEFINITION)?;
    host.start(config.port)?;
    host.register_service(SERVICE_NAME, SERVICE_TYPE, service.clone())?;

    println!("Service started, connect via");
    println!("{}", host.connection_url(&config.host, SERVICE_NAME)?);
    println!("press enter to quit ...");
    let reason = quit_signals.wait_for_quit();
    log::info!("quitting: {:?}", reason);

    let shutdown = service.shutdown();
    host.stop()?;
    claim.release()?;
    shutdown
}

fn setup_logging(level: &str) {
    if let Err(e) = simple_log::quick_log_level::<_, &str>(level, None) {
        eprintln!("could not set up logging: {}", e);
    }
}
