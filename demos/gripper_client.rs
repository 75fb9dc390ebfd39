// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use std::time::Duration;

use clap::{Parser, Subcommand};
use gripper_bridge::{GripperClient, GripperResult};

/// An example showing how to call a gripper served by gripper_host.
#[derive(Parser, Debug)]
#[clap(author, version, name = "gripper_client")]
struct CommandLineArguments {
    /// Url printed by gripper_host, e.g. tcp://localhost:2354/GripperServer.left/Gripper
    pub url: String,
    #[clap(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the live joint positions
    Positions,
    /// Select cylinder, sphere or pinch and grasp with it
    Grasp { shape: String },
    /// Open the fingers
    Open,
    /// Move all joints to zero
    Reset,
    /// Send a joint command: finger1 finger2 finger3 preshape
    Set {
        #[clap(number_of_values = 4)]
        q: Vec<f64>,
    },
    /// Print the service definition
    Definition,
}

fn main() -> GripperResult<()> {
    let args = CommandLineArguments::parse();
    let mut gripper = GripperClient::connect(&args.url)?;
    match args.action {
        Action::Positions => println!("{:?}", gripper.joint_positions()?),
        Action::Grasp { shape } => {
            gripper.set_grip_shape(&shape)?;
            std::thread::sleep(Duration::from_secs(1));
            gripper.close_grip()?;
            std::thread::sleep(Duration::from_secs(2));
            println!("{:?}", gripper.joint_positions()?);
        }
        Action::Open => gripper.open_grip()?,
        Action::Reset => gripper.reset_hand()?,
        Action::Set { q } => gripper.set_joint_command(&q)?,
        Action::Definition => print!("{}", gripper.service_definition()?),
    }
    Ok(())
}
