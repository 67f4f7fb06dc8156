//! Transport addresses.
//!
//! An address names a point-to-point endpoint that can both receive
//! envelopes (`send`) and be bound by a listener. Two schemes are supported:
//!
//! - `unix:///var/run/fabric/coordinator.sock` for filesystem-domain sockets
//! - `tcp://127.0.0.1:9400` for loopback or LAN TCP
//!
//! Addresses serialize as their URL string.

use crate::domain::error::CommError;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const UNIX_SCHEME: &str = "unix://";
const TCP_SCHEME: &str = "tcp://";

#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum Address {
    /// Filesystem-domain socket path.
    Unix(PathBuf),
    /// `host:port` pair, resolved at connect/bind time.
    Tcp(String),
}

impl Address {
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Address::Unix(path.into())
    }

    pub fn tcp(host_port: impl Into<String>) -> Self {
        Address::Tcp(host_port.into())
    }

    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Address::Unix(path) => Some(path),
            Address::Tcp(_) => None,
        }
    }
}

impl FromStr for Address {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix(UNIX_SCHEME) {
            if path.is_empty() {
                return Err(CommError::InvalidAddress(format!("{s}: empty socket path")));
            }
            return Ok(Address::Unix(PathBuf::from(path)));
        }

        if let Some(host_port) = s.strip_prefix(TCP_SCHEME) {
            let Some((host, port)) = host_port.rsplit_once(':') else {
                return Err(CommError::InvalidAddress(format!("{s}: missing port")));
            };
            if host.is_empty() {
                return Err(CommError::InvalidAddress(format!("{s}: missing host")));
            }
            port.parse::<u16>()
                .map_err(|_| CommError::InvalidAddress(format!("{s}: invalid port {port:?}")))?;
            return Ok(Address::Tcp(host_port.to_string()));
        }

        Err(CommError::InvalidAddress(format!(
            "{s}: expected {UNIX_SCHEME} or {TCP_SCHEME} scheme"
        )))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unix(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
            Address::Tcp(host_port) => write!(f, "{TCP_SCHEME}{host_port}"),
        }
    }
}
