//! Network addresses.
//!
//! An [`Address`] is a host plus a port. Hosts that parse as IP literals are
//! kept as [`IpAddr`]; anything else is kept as an unresolved name. Name
//! resolution is out of scope.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use parking_lot::Mutex;
use tether_core::{BridgeError, BridgeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Host {
    Ip(IpAddr),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AddressInner {
    host: Host,
    port: u16,
}

/// A host and port pair.
///
/// Exports only ever see a shared reference, so the fields sit behind a lock.
#[derive(Debug)]
pub struct Address {
    inner: Mutex<AddressInner>,
}

/// Check that a host-supplied integer is a valid port.
pub fn port_from_int(port: i32) -> BridgeResult<u16> {
    u16::try_from(port).map_err(|_| BridgeError::Native(format!("port {port} is out of range")))
}

impl Address {
    /// Parse an address.
    ///
    /// `host` may carry its own port (`"127.0.0.1:6121"`, `"[::1]:80"`), which
    /// is used when `port` is zero.
    pub fn parse(host: &str, port: u16) -> BridgeResult<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(BridgeError::Native("address host is empty".to_string()));
        }

        let (host, port) = if let Ok(socket) = host.parse::<SocketAddr>() {
            let port = if port == 0 { socket.port() } else { port };
            (Host::Ip(socket.ip()), port)
        } else if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
            (Host::Ip(ip), port)
        } else {
            (Host::Name(host.to_string()), port)
        };

        Ok(Self {
            inner: Mutex::new(AddressInner { host, port }),
        })
    }

    /// An independent copy.
    pub fn copy(&self) -> Self {
        Self {
            inner: Mutex::new(self.inner.lock().clone()),
        }
    }

    /// Overwrite this address with the contents of another.
    pub fn assign(&self, other: &Address) {
        if std::ptr::eq(self, other) {
            return;
        }
        let value = other.inner.lock().clone();
        *self.inner.lock() = value;
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.inner.lock().port
    }

    /// Change the port.
    pub fn set_port(&self, port: u16) {
        self.inner.lock().port = port;
    }

    /// Whether the host is an IPv6 literal.
    pub fn is_ipv6(&self) -> bool {
        matches!(self.inner.lock().host, Host::Ip(IpAddr::V6(_)))
    }

    /// The IP, if the host is a literal.
    pub fn ip(&self) -> Option<IpAddr> {
        match self.inner.lock().host {
            Host::Ip(ip) => Some(ip),
            Host::Name(_) => None,
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Self {
            inner: Mutex::new(AddressInner {
                host: Host::Ip(IpAddr::from([0, 0, 0, 0])),
                port: 0,
            }),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        match &inner.host {
            Host::Ip(ip) => write!(f, "{}", SocketAddr::new(*ip, inner.port)),
            Host::Name(name) => write!(f, "{}:{}", name, inner.port),
        }
    }
}
