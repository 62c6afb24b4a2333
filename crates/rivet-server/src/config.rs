//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::ServerError;

/// Default listen backlog, matching the usual `SOMAXCONN` on Linux.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Configuration for a [`crate::Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to. `None` binds the IPv4 wildcard address.
    pub address: Option<String>,
    /// Port to bind to. `0` picks an ephemeral port.
    pub port: u16,
    /// Listen backlog for the accepting socket
    pub backlog: u32,
    /// Initial exception-suppression policy for accepted sessions
    pub suppress_exceptions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: None, port: 0, backlog: DEFAULT_BACKLOG, suppress_exceptions: false }
    }
}

impl ServerConfig {
    /// Configuration binding the wildcard address on `port`.
    pub fn with_port(port: u16) -> Self {
        Self { port, ..Self::default() }
    }

    /// Configuration binding `address` on `port`.
    pub fn with_address(address: impl Into<String>, port: u16) -> Self {
        Self { address: Some(address.into()), port, ..Self::default() }
    }

    /// Resolve the configured endpoint.
    ///
    /// Only literal IP addresses are accepted; host names are not resolved.
    pub fn endpoint(&self) -> Result<SocketAddr, ServerError> {
        let ip = match &self.address {
            Some(address) => address.parse::<IpAddr>().map_err(|e| {
                ServerError::InvalidAddress { address: address.clone(), reason: e.to_string() }
            })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}
