// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the HostConfig type.
use std::path::PathBuf;

use crate::registry;

/// Default advertised host of the service url.
pub const DEFAULT_HOST: &str = "localhost";
/// Default log level of the binaries.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Directory used by [`DirectoryRegistry`](`crate::registry::DirectoryRegistry`) if none is
/// configured.
pub fn default_registry_dir() -> PathBuf {
    std::env::temp_dir().join("gripper_registry")
}

/// Settings of one gripper host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Name of the gripper, e.g. `left`.
    pub name: String,
    /// Port of the service host, 0 picks a free port.
    pub port: u16,
    /// Host name advertised in the connection url.
    pub host: String,
    pub registry_dir: PathBuf,
    pub log_level: String,
}

impl HostConfig {
    pub fn new(name: &str) -> Self {
        HostConfig {
            name: name.to_string(),
            port: 0,
            host: DEFAULT_HOST.to_string(),
            registry_dir: default_registry_dir(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Node name of the service host, `GripperServer.<name>`.
    pub fn node_name(&self) -> String {
        format!("GripperServer.{}", self.name)
    }

    pub fn host_param_key(&self) -> String {
        registry::host_param_key(&self.name)
    }

    pub fn hand_param_key(&self) -> String {
        registry::hand_param_key(&self.name)
    }
}
