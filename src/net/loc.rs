use std::fmt;
use std::net::{IpAddr, SocketAddr};

#[cfg(unix)]
const AF_INET: i32 = libc::AF_INET;
#[cfg(unix)]
const AF_INET6: i32 = libc::AF_INET6;

#[cfg(windows)]
const AF_INET: i32 = windows_sys::Win32::Networking::WinSock::AF_INET as i32;
#[cfg(windows)]
const AF_INET6: i32 = windows_sys::Win32::Networking::WinSock::AF_INET6 as i32;

/// A bind or peer location.
///
/// Either end of a connection: the address a listener binds, the address a
/// dial targets, or the peer of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    ip: IpAddr,
    port: u16,
}

impl Loc {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The native address family for socket creation.
    pub(crate) fn domain(&self) -> i32 {
        match self.ip {
            IpAddr::V4(_) => AF_INET,
            IpAddr::V6(_) => AF_INET6,
        }
    }
}

impl From<SocketAddr> for Loc {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.ip, self.port)
    }
}
