//! Server address resolution. IPv4 only.

use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::Error;

/// Resolve a host name or literal address to an IPv4 address.
pub fn resolve(host: &str) -> Result<IpAddr, Error> {
    let resolution = |reason: String| Error::Resolution {
        host: host.to_string(),
        reason,
    };

    if host.is_empty() {
        return Err(resolution("empty host".to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(_) => Ok(ip),
            IpAddr::V6(_) => Err(resolution("not an IPv4 address".to_string())),
        };
    }

    let addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|e| resolution(e.to_string()))?;

    for addr in addrs {
        if addr.is_ipv4() {
            trace!("Resolved {} to {}", host, addr.ip());
            return Ok(addr.ip());
        }
    }

    Err(resolution("no IPv4 address".to_string()))
}

/// The resolved server address and the host text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    host: String,
    addr: SocketAddr,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, addr: SocketAddr) -> Self {
        ServerEndpoint {
            host: host.into(),
            addr,
        }
    }

    pub fn resolve(host: &str, port: u16) -> Result<Self, Error> {
        let ip = resolve(host)?;
        Ok(ServerEndpoint::new(host, SocketAddr::new(ip, port)))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.addr.ip().to_string() {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{} ({})", self.host, self.addr)
        }
    }
}
