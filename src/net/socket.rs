use std::io;

use crate::mux::sys;
use crate::net::SocketConfig;

/// Raw native socket handle: an `int` on POSIX systems, a 64-bit `SOCKET`
/// on Windows.
#[cfg(unix)]
pub type RawSocketHandle = std::os::fd::RawFd;

#[cfg(windows)]
pub type RawSocketHandle = std::os::windows::io::RawSocket;

/// An opaque, platform-normalized socket handle.
///
/// Equality and hash are the raw handle value: the OS guarantees live
/// handles are unique, which makes the value itself a perfect,
/// collision-free hash, and the key of the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Socket {
    raw: RawSocketHandle,
}

impl Socket {
    pub(crate) fn new(raw: RawSocketHandle) -> Self {
        Self { raw }
    }

    /// The native handle value.
    pub fn raw(&self) -> RawSocketHandle {
        self.raw
    }

    /// The handle as a registry key.
    ///
    /// On Windows the 64-bit handle is truncated; live handle values fit.
    pub fn int_value(&self) -> i32 {
        self.raw as i32
    }
}

impl std::fmt::Display for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Applies the per-connection socket options.
pub(crate) fn configure_connection(socket: Socket, config: &SocketConfig) -> io::Result<()> {
    sys::sys_set_keepalive(socket.raw(), config.keep_alive)?;
    sys::sys_set_nodelay(socket.raw(), config.tcp_no_delay)?;
    Ok(())
}
