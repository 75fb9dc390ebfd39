// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the ServiceUrl type.
use std::fmt;
use std::str::FromStr;

use crate::exception::GripperException;

/// Address of a service: `tcp://<host>:<port>/<node name>/<service name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    pub host: String,
    pub port: u16,
    pub node_name: String,
    pub service_name: String,
}

impl ServiceUrl {
    pub fn new(host: &str, port: u16, node_name: &str, service_name: &str) -> Self {
        ServiceUrl {
            host: host.to_string(),
            port,
            node_name: node_name.to_string(),
            service_name: service_name.to_string(),
        }
    }

    /// `host:port` part of the url.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "tcp://{}:{}/{}/{}",
            self.host, self.port, self.node_name, self.service_name
        )
    }
}

impl FromStr for ServiceUrl {
    type Err = GripperException;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| GripperException::InvalidArgument {
            message: format!("invalid service url {:?}: {}", url, reason),
        };
        let rest = url
            .strip_prefix("tcp://")
            .ok_or_else(|| invalid("only tcp:// urls are supported"))?;
        let mut parts = rest.splitn(3, '/');
        let authority = parts.next().unwrap_or_default();
        let node_name = parts.next().unwrap_or_default();
        let service_name = parts.next().unwrap_or_default();
        if node_name.is_empty() || service_name.is_empty() || service_name.contains('/') {
            return Err(invalid("expected /<node name>/<service name>"));
        }
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        Ok(ServiceUrl::new(host, port, node_name, service_name))
    }
}
