// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kinds of errors the gripper service, its host and its clients can report.
#[derive(Error, Debug)]
pub enum GripperException {
    /// NameConflict is returned at startup if another gripper host is already registered
    /// under the requested name.
    #[error("The name '{name}' is not valid. Another gripper is already initialized with that name.")]
    NameConflict { name: String },

    /// ServiceNotReady is returned at startup if the hand driver for the requested name
    /// has not been started yet or cannot be reached.
    #[error("The name '{name}' is not valid. The gripper services may not be started yet: {message}")]
    ServiceNotReady { name: String, message: String },

    /// InvalidArgument is returned if a malformed joint command is received.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// UpstreamReadFailure is returned if the hand driver could not report its motor positions.
    #[error("Hand driver read failed: {message}")]
    UpstreamReadFailure { message: String },

    /// IncompatibleVersionError is returned if the remote side speaks another protocol version.
    #[error("Incompatible library version: Server has version {server_version:?} and gripper-rr-bridge has {library_version:?}")]
    IncompatibleVersionError {
        /// Protocol version of the remote side.
        server_version: u16,
        /// Protocol version of this library.
        library_version: u16,
    },

    /// NetworkException is returned if a connection cannot be established, is lost or a timeout occurs.
    #[error("{message:?}")]
    NetworkException { message: String },

    /// CommandException is returned if the remote side rejected or failed a call.
    #[error("{message:?}")]
    CommandException { message: String },

    /// ServiceException is returned for service registration and name registry failures.
    #[error("{message:?}")]
    ServiceException { message: String },
}

/// creates a CommandException from a static string slice
pub(crate) fn create_command_exception(message: &'static str) -> GripperException {
    GripperException::CommandException {
        message: message.to_string(),
    }
}

impl From<std::io::Error> for GripperException {
    fn from(error: std::io::Error) -> Self {
        GripperException::NetworkException {
            message: error.to_string(),
        }
    }
}

impl From<bincode::Error> for GripperException {
    fn from(error: bincode::Error) -> Self {
        GripperException::NetworkException {
            message: format!("malformed message: {}", error),
        }
    }
}

impl From<nix::Error> for GripperException {
    fn from(error: nix::Error) -> Self {
        GripperException::NetworkException {
            message: error.to_string(),
        }
    }
}

/// Result type which can have GripperException as Error
pub type GripperResult<T> = Result<T, GripperException>;
