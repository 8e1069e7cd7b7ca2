//! Small shared types describing a request.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Transport network of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetworkError(String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Network::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Network::Udp)
        } else {
            Err(UnknownNetworkError(s.to_string()))
        }
    }
}

/// IP address family selector for the `ip_version` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Interpret the numeric config value; only 4 and 6 are recognized.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }

    /// Family of a concrete address.
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    pub fn value(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Identity of the process that originated a request.
///
/// Resolved by a platform-specific collaborator on the caller's side before
/// rule matching; the engine only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Executable name (basename of the path when not separately known).
    pub name: Option<String>,
    /// Absolute executable path.
    pub path: Option<String>,
    /// Android package name.
    pub package_name: Option<String>,
    /// OS user owning the process.
    pub user: Option<String>,
    /// OS user id owning the process.
    pub user_id: Option<u32>,
}

/// WiFi network the device is currently attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiState {
    pub ssid: String,
    pub bssid: String,
}
