// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//!  Contains the gripper_bridge::GripperService type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::exception::{GripperException, GripperResult};
use crate::gripper::joint_command::{GripShape, JointCommand};
use crate::hand::types::PoseMessage;
use crate::hand::{CommandChannel, HandDriver};
use crate::utils::lock;

pub mod joint_command;
pub mod types;

/// Service definition of the gripper interface.
pub const SERVICE_DEFINITION: &str = "\
#Service to provide simple interface to the Right Hand Robotics Gripper Hands
service Gripper_Interface

option version 0.4

object Gripper
property double[] joint_positions

function void setJointCommand(double[] command)
function void closeGrip()
function void openGrip()
function void resetHand()
function void setGripShape(string shape)
end object
";

/// Qualified type of the gripper object.
pub const SERVICE_TYPE: &str = "Gripper_Interface.Gripper";

/// Name under which the gripper object is registered.
pub const SERVICE_NAME: &str = "Gripper";

/// Remote members of `object Gripper`.
///
/// This is the interface a [`ServiceHost`](`crate::server::ServiceHost`) binds to the network.
pub trait GripperObject: Send + Sync {
    /// Live joint positions as reported by the hand. Read-only property `joint_positions`.
    fn joint_positions(&self) -> GripperResult<[f64; 4]>;
    fn set_joint_command(&self, command: &[f64]) -> GripperResult<()>;
    fn close_grip(&self) -> GripperResult<()>;
    fn open_grip(&self) -> GripperResult<()>;
    fn reset_hand(&self) -> GripperResult<()>;
    fn set_grip_shape(&self, shape: &str) -> GripperResult<()>;
}

struct CommandState<C: CommandChannel> {
    joint_command: JointCommand,
    channel: C,
}

impl<C: CommandChannel> CommandState<C> {
    fn publish(&mut self) -> GripperResult<()> {
        let pose = PoseMessage::from(self.joint_command);
        self.channel.publish(&pose)
    }
}

/// Forwards gripper calls to a hand.
///
/// The last commanded joint vector is cached. Every command-issuing operation mutates the cache
/// and publishes the complete vector on the [`CommandChannel`] while holding the same lock, so
/// the last published vector always equals the cache. Positions read from the [`HandDriver`] are
/// kept in a separate cache.
pub struct GripperService<H: HandDriver, C: CommandChannel> {
    name: String,
    hand: Mutex<H>,
    command: Mutex<CommandState<C>>,
    joint_positions: Mutex<[f64; 4]>,
    torque_disabled: AtomicBool,
}

impl<H: HandDriver, C: CommandChannel> GripperService<H, C> {
    /// Creates the service with a zero joint command. Nothing is published.
    /// # Arguments
    /// * `name` - Name of the gripper, e.g. `left`.
    /// * `hand` - Driver that reports the motor positions.
    /// * `channel` - Channel the joint commands are published on.
    pub fn new(name: &str, hand: H, channel: C) -> Self {
        GripperService {
            name: name.to_string(),
            hand: Mutex::new(hand),
            command: Mutex::new(CommandState {
                joint_command: JointCommand::zeros(),
                channel,
            }),
            joint_positions: Mutex::new([0.; 4]),
            torque_disabled: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of the last commanded joint vector.
    pub fn joint_command(&self) -> JointCommand {
        self.lock_command().joint_command
    }

    /// Returns the positions of the last successful [`get_joint_positions`](`Self::get_joint_positions`).
    pub fn cached_joint_positions(&self) -> [f64; 4] {
        *lock(&self.joint_positions)
    }

    /// Queries the hand for its live motor positions.
    /// # Errors
    /// * [`UpstreamReadFailure`](`crate::exception::GripperException::UpstreamReadFailure`) if the
    /// hand driver could not be read.
    pub fn get_joint_positions(&self) -> GripperResult<[f64; 4]> {
        let positions = lock(&self.hand)
            .get_motor_positions()
            .map_err(|e| match e {
                GripperException::UpstreamReadFailure { .. } => e,
                e => GripperException::UpstreamReadFailure {
                    message: e.to_string(),
                },
            })?;
        *lock(&self.joint_positions) = positions;
        Ok(positions)
    }

    /// Replaces the joint command and publishes it.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::GripperException::InvalidArgument`) if `command`
    /// does not hold exactly four finite, non-negative values. Nothing is published then.
    pub fn set_joint_command(&self, command: &[f64]) -> GripperResult<()> {
        let joint_command = JointCommand::try_from_slice(command)?;
        log::debug!("{}: set joint command {:?}", self.name, joint_command.q());
        let mut state = self.lock_command();
        state.joint_command = joint_command;
        state.publish()
    }

    /// Closes the fingers according to the current preshape and publishes the result.
    ///
    /// If the preshape matches none of the presets the command is published unchanged.
    pub fn close_grip(&self) -> GripperResult<()> {
        let mut state = self.lock_command();
        match state.joint_command.close_fingers() {
            Some(shape) => log::debug!("{}: close grip ({})", self.name, shape.name()),
            None => log::debug!(
                "{}: close grip with unknown preshape {}, command unchanged",
                self.name,
                state.joint_command.preshape()
            ),
        }
        state.publish()
    }

    /// Opens all fingers, keeps the preshape and publishes the result.
    pub fn open_grip(&self) -> GripperResult<()> {
        log::debug!("{}: open grip", self.name);
        let mut state = self.lock_command();
        state.joint_command.open_fingers();
        state.publish()
    }

    /// Sets the preshape to one of the presets and publishes the result.
    ///
    /// `shape` is one of `cylinder`, `sphere`, `pinch` or their first letter, in any case.
    /// Unknown names are ignored: nothing changes, nothing is published and no error is returned.
    pub fn set_grip_shape(&self, shape: &str) -> GripperResult<()> {
        let grip_shape = match GripShape::from_alias(shape) {
            Some(grip_shape) => grip_shape,
            None => {
                log::debug!("{}: ignoring unknown grip shape {:?}", self.name, shape);
                return Ok(());
            }
        };
        log::debug!("{}: set grip shape {}", self.name, grip_shape.name());
        let mut state = self.lock_command();
        state.joint_command.set_preshape(grip_shape);
        state.publish()
    }

    /// Zeroes the joint command and publishes it.
    pub fn reset_hand(&self) -> GripperResult<()> {
        log::debug!("{}: reset hand", self.name);
        let mut state = self.lock_command();
        state.joint_command = JointCommand::zeros();
        state.publish()
    }

    /// Disables the torque of the hand.
    ///
    /// Only the first call reaches the hand, later calls return immediately. Dropping the
    /// service performs the shutdown if it has not been done before.
    pub fn shutdown(&self) -> GripperResult<()> {
        if self.torque_disabled.swap(true, Ordering::SeqCst) {
            log::warn!("{}: torque is already disabled", self.name);
            return Ok(());
        }
        log::info!("{}: disabling torque", self.name);
        lock(&self.hand).disable_torque()
    }

    pub fn is_shut_down(&self) -> bool {
        self.torque_disabled.load(Ordering::SeqCst)
    }

    fn lock_command(&self) -> MutexGuard<'_, CommandState<C>> {
        lock(&self.command)
    }
}

impl<H: HandDriver, C: CommandChannel> Drop for GripperService<H, C> {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            if let Err(e) = self.shutdown() {
                log::error!("{}: could not disable torque: {}", self.name, e);
            }
        }
    }
}

impl<H: HandDriver, C: CommandChannel> GripperObject for GripperService<H, C> {
    fn joint_positions(&self) -> GripperResult<[f64; 4]> {
        self.get_joint_positions()
    }

    fn set_joint_command(&self, command: &[f64]) -> GripperResult<()> {
        GripperService::set_joint_command(self, command)
    }

    fn close_grip(&self) -> GripperResult<()> {
        GripperService::close_grip(self)
    }

    fn open_grip(&self) -> GripperResult<()> {
        GripperService::open_grip(self)
    }

    fn reset_hand(&self) -> GripperResult<()> {
        GripperService::reset_hand(self)
    }

    fn set_grip_shape(&self, shape: &str) -> GripperResult<()> {
        GripperService::set_grip_shape(self, shape)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mockall::predicate::*;
    use mockall::Sequence;

    use crate::exception::GripperException;
    use crate::gripper::joint_command::{
        FINGER_CLOSED, FINGER_PINCH, PRESHAPE_CYLINDER, PRESHAPE_PINCH, PRESHAPE_SPHERICAL,
    };
    use crate::gripper::GripperService;
    use crate::hand::types::PoseMessage;
    use crate::hand::{MockCommandChannel, MockHandDriver};

    fn hand_expecting_shutdown() -> MockHandDriver {
        let mut hand = MockHandDriver::new();
        hand.expect_disable_torque().times(1).returning(|| Ok(()));
        hand
    }

    /// Channel that records every published pose.
    fn recording_channel() -> (MockCommandChannel, Arc<Mutex<Vec<[f64; 4]>>>) {
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let mut channel = MockCommandChannel::new();
        channel.expect_publish().returning(move |pose: &PoseMessage| {
            sink.lock().unwrap().push(pose.q());
            Ok(())
        });
        (channel, published)
    }

    #[test]
    fn new_service_starts_at_zero_without_publishing() {
        let mut channel = MockCommandChannel::new();
        channel.expect_publish().times(0);
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        assert_eq!(service.name(), "left");
        assert_eq!(service.joint_command().q(), [0.; 4]);
        assert_eq!(service.cached_joint_positions(), [0.; 4]);
    }

    #[test]
    fn set_grip_shape_sets_preset_and_keeps_fingers() {
        let cases = [
            ("c", PRESHAPE_CYLINDER),
            ("cylinder", PRESHAPE_CYLINDER),
            ("CyLiNdEr", PRESHAPE_CYLINDER),
            ("s", PRESHAPE_SPHERICAL),
            ("Sphere", PRESHAPE_SPHERICAL),
            ("P", PRESHAPE_PINCH),
            ("pinch", PRESHAPE_PINCH),
        ];
        for (shape, preshape) in cases.iter() {
            let (channel, published) = recording_channel();
            let service = GripperService::new("left", hand_expecting_shutdown(), channel);
            service.set_joint_command(&[1., 2., 3., 0.5]).unwrap();
            service.set_grip_shape(shape).unwrap();
            assert_eq!(service.joint_command().q(), [1., 2., 3., *preshape], "{}", shape);
            assert_eq!(
                published.lock().unwrap().last().copied(),
                Some([1., 2., 3., *preshape])
            );
        }
    }

    #[test]
    fn unknown_grip_shape_is_ignored_without_publishing() {
        let mut channel = MockCommandChannel::new();
        channel
            .expect_publish()
            .withf(|pose: &PoseMessage| pose.q() == [1., 2., 3., PRESHAPE_SPHERICAL])
            .times(1)
            .returning(|_| Ok(()));
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service
            .set_joint_command(&[1., 2., 3., PRESHAPE_SPHERICAL])
            .unwrap();
        for shape in ["cube", "", "cyl", "pinch!"].iter() {
            service.set_grip_shape(shape).unwrap();
        }
        assert_eq!(
            service.joint_command().q(),
            [1., 2., 3., PRESHAPE_SPHERICAL]
        );
    }

    #[test]
    fn reset_hand_zeroes_command_and_is_idempotent() {
        let (channel, published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_joint_command(&[1., 2., 3., 4.]).unwrap();
        service.reset_hand().unwrap();
        let once = service.joint_command();
        service.reset_hand().unwrap();
        assert_eq!(service.joint_command(), once);
        assert_eq!(once.q(), [0.; 4]);
        assert_eq!(published.lock().unwrap().len(), 3);
        assert_eq!(published.lock().unwrap().last().copied(), Some([0.; 4]));
    }

    #[test]
    fn open_grip_zeroes_fingers_and_keeps_preshape() {
        let (channel, published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_joint_command(&[4.6, 2.5, 1.25, 0.75]).unwrap();
        service.open_grip().unwrap();
        assert_eq!(service.joint_command().q(), [0., 0., 0., 0.75]);
        assert_eq!(
            published.lock().unwrap().last().copied(),
            Some([0., 0., 0., 0.75])
        );
    }

    #[test]
    fn cylinder_close_grip() {
        let (channel, published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_grip_shape("cylinder").unwrap();
        service.close_grip().unwrap();
        let expected = [FINGER_CLOSED, FINGER_CLOSED, FINGER_CLOSED, 0.];
        assert_eq!(service.joint_command().q(), expected);
        assert_eq!(expected, [4.6, 4.6, 4.6, 0.]);
        assert_eq!(published.lock().unwrap().last().copied(), Some(expected));
    }

    #[test]
    fn sphere_close_grip() {
        let (channel, _published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_grip_shape("s").unwrap();
        service.close_grip().unwrap();
        assert_eq!(
            service.joint_command().q(),
            [FINGER_PINCH, FINGER_PINCH, FINGER_PINCH, PRESHAPE_SPHERICAL]
        );
    }

    #[test]
    fn pinch_close_grip_moves_two_fingers() {
        let (channel, _published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_grip_shape("pinch").unwrap();
        service.close_grip().unwrap();
        assert_eq!(service.joint_command().q(), [2.5, 2.5, 0., 2.5]);
    }

    #[test]
    fn close_grip_without_preset_publishes_unchanged_command() {
        let (channel, published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_joint_command(&[0.1, 0.2, 0.3, 1.0]).unwrap();
        service.close_grip().unwrap();
        assert_eq!(service.joint_command().q(), [0.1, 0.2, 0.3, 1.0]);
        let published = published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1], [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn invalid_joint_commands_are_rejected() {
        let mut channel = MockCommandChannel::new();
        channel.expect_publish().times(0);
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        for command in [vec![1., 2., 3.], vec![f64::NAN, 0., 0., 0.], vec![]].iter() {
            match service.set_joint_command(command) {
                Err(GripperException::InvalidArgument { .. }) => {}
                other => panic!("expected InvalidArgument but found {:?}", other),
            }
        }
        assert_eq!(service.joint_command().q(), [0.; 4]);
    }

    #[test]
    fn joint_positions_come_from_the_hand() {
        let mut hand = hand_expecting_shutdown();
        hand.expect_get_motor_positions()
            .times(1)
            .returning(|| Ok([0.5, 0.25, 0.125, 1.5]));
        let (channel, published) = recording_channel();
        let service = GripperService::new("left", hand, channel);
        service.set_joint_command(&[1., 2., 3., 4.]).unwrap();
        assert_eq!(service.get_joint_positions().unwrap(), [0.5, 0.25, 0.125, 1.5]);
        assert_eq!(service.cached_joint_positions(), [0.5, 0.25, 0.125, 1.5]);
        assert_eq!(service.joint_command().q(), [1., 2., 3., 4.]);
        assert_eq!(
            published.lock().unwrap().last().copied(),
            Some([1., 2., 3., 4.])
        );
    }

    #[test]
    fn hand_read_errors_are_upstream_failures() {
        let mut hand = hand_expecting_shutdown();
        hand.expect_get_motor_positions().times(1).returning(|| {
            Err(GripperException::NetworkException {
                message: "connection reset".to_string(),
            })
        });
        let (channel, _published) = recording_channel();
        let service = GripperService::new("left", hand, channel);
        match service.get_joint_positions() {
            Err(GripperException::UpstreamReadFailure { message }) => {
                assert!(message.contains("connection reset"))
            }
            other => panic!("expected UpstreamReadFailure but found {:?}", other),
        }
        assert_eq!(service.cached_joint_positions(), [0.; 4]);
    }

    #[test]
    fn every_publish_carries_the_full_command() {
        let mut sequence = Sequence::new();
        let mut channel = MockCommandChannel::new();
        let expected_poses = [
            [0., 0., 0., PRESHAPE_PINCH],
            [FINGER_PINCH, FINGER_PINCH, 0., PRESHAPE_PINCH],
            [0., 0., 0., PRESHAPE_PINCH],
            [0., 0., 0., 0.],
        ];
        for expected in expected_poses.iter().copied() {
            channel
                .expect_publish()
                .with(eq(PoseMessage {
                    f1: expected[0],
                    f2: expected[1],
                    f3: expected[2],
                    preshape: expected[3],
                }))
                .times(1)
                .in_sequence(&mut sequence)
                .returning(|_| Ok(()));
        }
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        service.set_grip_shape("p").unwrap();
        service.close_grip().unwrap();
        service.open_grip().unwrap();
        service.reset_hand().unwrap();
    }

    #[test]
    fn shutdown_disables_torque_once() {
        let (channel, _published) = recording_channel();
        let service = GripperService::new("left", hand_expecting_shutdown(), channel);
        assert!(!service.is_shut_down());
        service.shutdown().unwrap();
        service.shutdown().unwrap();
        assert!(service.is_shut_down());
        drop(service);
    }

    #[test]
    fn concurrent_calls_never_tear_the_command() {
        let (channel, published) = recording_channel();
        let service = Arc::new(GripperService::new(
            "left",
            hand_expecting_shutdown(),
            channel,
        ));
        let threads: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || {
                    let value = i as f64;
                    for _ in 0..50 {
                        service
                            .set_joint_command(&[value, value, value, value])
                            .unwrap();
                        let q = service.joint_command().q();
                        assert!(q.iter().all(|x| *x == q[0]));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let published = published.lock().unwrap();
        assert_eq!(published.len(), 200);
        assert!(published.iter().all(|q| q.iter().all(|x| *x == q[0])));
        assert_eq!(published.last().copied(), Some(service.joint_command().q()));
    }
}
