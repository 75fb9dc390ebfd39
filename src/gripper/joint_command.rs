// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the joint command vector and the grip shape presets of the hand.
use std::fmt;

use nalgebra::Vector4;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::exception::{GripperException, GripperResult};

/// Number of values in a joint command: three fingers and the preshape.
pub const NUMBER_OF_JOINTS: usize = 4;
/// Finger target for a full power grasp. \[rad\]
pub const FINGER_CLOSED: f64 = 4.6;
/// Finger target for spherical and pinch grasps. \[rad\]
pub const FINGER_PINCH: f64 = 2.5;
/// Preshape angle of the cylinder shape. \[rad\]
pub const PRESHAPE_CYLINDER: f64 = 0.;
/// Preshape angle of the sphere shape. \[rad\]
pub const PRESHAPE_SPHERICAL: f64 = 1.5;
/// Preshape angle of the pinch shape. \[rad\]
pub const PRESHAPE_PINCH: f64 = 2.5;

/// Names the entries of a [`JointCommand`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Joint {
    Finger1,
    Finger2,
    Finger3,
    Preshape,
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Joint::Finger1 => "finger 1",
            Joint::Finger2 => "finger 2",
            Joint::Finger3 => "finger 3",
            Joint::Preshape => "preshape",
        };
        write!(f, "{}", name)
    }
}

/// Preset configurations of the finger assembly.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GripShape {
    Cylinder,
    Sphere,
    Pinch,
}

static SHAPE_ALIASES: [(&str, GripShape); 6] = [
    ("cylinder", GripShape::Cylinder),
    ("c", GripShape::Cylinder),
    ("sphere", GripShape::Sphere),
    ("s", GripShape::Sphere),
    ("pinch", GripShape::Pinch),
    ("p", GripShape::Pinch),
];

impl GripShape {
    /// Looks up a shape by one of its names or its one letter shorthand, ignoring case.
    pub fn from_alias(name: &str) -> Option<GripShape> {
        let name = name.to_lowercase();
        SHAPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, shape)| *shape)
    }

    /// Preshape angle of this shape. \[rad\]
    pub fn preshape(&self) -> f64 {
        match self {
            GripShape::Cylinder => PRESHAPE_CYLINDER,
            GripShape::Sphere => PRESHAPE_SPHERICAL,
            GripShape::Pinch => PRESHAPE_PINCH,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GripShape::Cylinder => "cylinder",
            GripShape::Sphere => "sphere",
            GripShape::Pinch => "pinch",
        }
    }
}

/// Joint targets sent to the hand: `[finger1, finger2, finger3, preshape]`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct JointCommand {
    q: Vector4<f64>,
}

impl Default for JointCommand {
    fn default() -> Self {
        JointCommand::zeros()
    }
}

impl JointCommand {
    pub fn zeros() -> Self {
        JointCommand {
            q: Vector4::zeros(),
        }
    }

    pub fn new(q: [f64; NUMBER_OF_JOINTS]) -> Self {
        JointCommand {
            q: Vector4::new(q[0], q[1], q[2], q[3]),
        }
    }

    /// Creates a joint command from values received from a caller.
    /// # Errors
    /// * [`InvalidArgument`](`crate::exception::GripperException::InvalidArgument`) if not exactly
    /// four values are given or a value is negative, NaN or infinite.
    pub fn try_from_slice(command: &[f64]) -> GripperResult<Self> {
        if command.len() != NUMBER_OF_JOINTS {
            return Err(GripperException::InvalidArgument {
                message: format!(
                    "expected {} joint values but received {}",
                    NUMBER_OF_JOINTS,
                    command.len()
                ),
            });
        }
        for (i, value) in command.iter().enumerate() {
            let joint = Joint::from_usize(i).unwrap_or(Joint::Preshape);
            if !value.is_finite() {
                return Err(GripperException::InvalidArgument {
                    message: format!("{} is not a finite number ({})", joint, value),
                });
            }
            if *value < 0. {
                return Err(GripperException::InvalidArgument {
                    message: format!("{} must not be negative ({})", joint, value),
                });
            }
        }
        Ok(JointCommand {
            q: Vector4::from_column_slice(command),
        })
    }

    pub fn q(&self) -> [f64; NUMBER_OF_JOINTS] {
        [self.q[0], self.q[1], self.q[2], self.q[3]]
    }

    pub fn get(&self, joint: Joint) -> f64 {
        self.q[joint as usize]
    }

    pub fn preshape(&self) -> f64 {
        self.q[Joint::Preshape as usize]
    }

    pub fn set_preshape(&mut self, shape: GripShape) {
        self.q[Joint::Preshape as usize] = shape.preshape();
    }

    /// Shape whose preset angle equals the current preshape exactly, checked in the order
    /// cylinder, sphere, pinch.
    pub fn current_shape(&self) -> Option<GripShape> {
        let preshape = self.preshape();
        [GripShape::Cylinder, GripShape::Sphere, GripShape::Pinch]
            .iter()
            .copied()
            .find(|shape| shape.preshape() == preshape)
    }

    /// Closes the fingers according to the current preshape.
    ///
    /// Cylinder closes all three fingers fully, sphere moves all three to the pinch target and
    /// pinch only moves fingers 1 and 2. Without a recognized preshape nothing is changed.
    ///
    /// # Return
    /// The shape that was used to close the fingers.
    pub fn close_fingers(&mut self) -> Option<GripShape> {
        let shape = self.current_shape()?;
        match shape {
            GripShape::Cylinder => self.set_fingers(3, FINGER_CLOSED),
            GripShape::Sphere => self.set_fingers(3, FINGER_PINCH),
            GripShape::Pinch => self.set_fingers(2, FINGER_PINCH),
        }
        Some(shape)
    }

    /// Opens all fingers, keeping the preshape.
    pub fn open_fingers(&mut self) {
        self.set_fingers(3, 0.);
    }

    fn set_fingers(&mut self, count: usize, value: f64) {
        self.q
            .iter_mut()
            .take(count.min(Joint::Preshape as usize))
            .for_each(|q| *q = value);
    }
}

#[cfg(test)]
mod tests {
    use crate::gripper::joint_command::{
        GripShape, Joint, JointCommand, FINGER_CLOSED, FINGER_PINCH, PRESHAPE_PINCH,
        PRESHAPE_SPHERICAL,
    };
    use crate::GripperException;

    #[test]
    fn aliases_are_case_insensitive() {
        let cases = [
            ("c", GripShape::Cylinder),
            ("Cylinder", GripShape::Cylinder),
            ("S", GripShape::Sphere),
            ("sPhErE", GripShape::Sphere),
            ("p", GripShape::Pinch),
            ("PINCH", GripShape::Pinch),
        ];
        for (alias, shape) in cases.iter() {
            assert_eq!(GripShape::from_alias(alias), Some(*shape), "alias {}", alias);
        }
    }

    #[test]
    fn unknown_aliases_are_not_resolved() {
        for alias in ["", "cyl", " c", "cube", "pinch "].iter() {
            assert_eq!(GripShape::from_alias(alias), None, "alias {:?}", alias);
        }
    }

    #[test]
    fn close_fingers_for_sphere() {
        let mut command = JointCommand::zeros();
        command.set_preshape(GripShape::Sphere);
        assert_eq!(command.close_fingers(), Some(GripShape::Sphere));
        assert_eq!(
            command.q(),
            [FINGER_PINCH, FINGER_PINCH, FINGER_PINCH, PRESHAPE_SPHERICAL]
        );
    }

    #[test]
    fn close_fingers_without_known_preshape_keeps_command() {
        let mut command = JointCommand::new([1., 2., 3., 0.7]);
        assert_eq!(command.close_fingers(), None);
        assert_eq!(command.q(), [1., 2., 3., 0.7]);
    }

    #[test]
    fn close_fingers_from_zero_is_cylinder() {
        let mut command = JointCommand::zeros();
        assert_eq!(command.close_fingers(), Some(GripShape::Cylinder));
        assert_eq!(command.get(Joint::Finger3), FINGER_CLOSED);
    }

    #[test]
    fn open_fingers_keeps_preshape() {
        let mut command = JointCommand::new([4.6, 4.6, 1.0, PRESHAPE_PINCH]);
        command.open_fingers();
        assert_eq!(command.q(), [0., 0., 0., PRESHAPE_PINCH]);
    }

    #[test]
    fn try_from_slice_validates_input() {
        assert!(JointCommand::try_from_slice(&[1., 2., 3., 4.]).is_ok());
        for bad in [
            vec![1., 2., 3.],
            vec![1., 2., 3., 4., 5.],
            vec![f64::NAN, 0., 0., 0.],
            vec![0., f64::INFINITY, 0., 0.],
            vec![0., 0., -0.1, 0.],
        ]
        .iter()
        {
            match JointCommand::try_from_slice(bad) {
                Err(GripperException::InvalidArgument { .. }) => {}
                other => panic!("expected InvalidArgument for {:?} but found {:?}", bad, other),
            }
        }
    }
}
