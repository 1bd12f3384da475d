use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::error::StreamAddressError;

/// Host the receiver binds to when none is given: every interface.
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
/// Port drones stream their video to.
pub const DEFAULT_PORT: u16 = 8899;

/// Transport a stream arrives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Where encoded video arrives, e.g. `udp://@0.0.0.0:8899`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAddress {
    pub protocol: Protocol,
    pub host: IpAddr,
    pub port: u16,
}

impl StreamAddress {
    pub fn udp(host: IpAddr, port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            host,
            port,
        }
    }

    /// Listen on every interface at `port`.
    pub fn any(port: u16) -> Self {
        Self::udp(DEFAULT_HOST, port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for StreamAddress {
    fn default() -> Self {
        Self::any(DEFAULT_PORT)
    }
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            IpAddr::V4(ip) => write!(f, "{}://@{}:{}", self.protocol, ip, self.port),
            IpAddr::V6(ip) => write!(f, "{}://@[{}]:{}", self.protocol, ip, self.port),
        }
    }
}

impl FromStr for StreamAddress {
    type Err = StreamAddressError;

    /// Accepts `udp://@ip:port`, `udp://ip:port` and bare `ip:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let rest = match s.split_once("://") {
            Some((scheme, rest)) => {
                if !scheme.eq_ignore_ascii_case("udp") {
                    return Err(StreamAddressError::UnsupportedProtocol(scheme.to_string()));
                }
                rest
            }
            None => s,
        };
        let rest = rest.strip_prefix('@').unwrap_or(rest);

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| StreamAddressError::MissingPort(s.to_string()))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = if host.is_empty() {
            DEFAULT_HOST
        } else {
            host.parse().map_err(|_| StreamAddressError::InvalidHost {
                host: host.to_string(),
            })?
        };

        let port = port.parse().map_err(|_| StreamAddressError::InvalidPort {
            port: port.to_string(),
        })?;

        Ok(Self::udp(host, port))
    }
}
