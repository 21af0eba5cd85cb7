//! POSIX socket syscall layer.
//!
//! Thin wrappers over `libc` returning standard `io::Result`s. Every socket
//! the engine creates or accepts is switched to non-blocking mode before it
//! is handed to a multiplexer; the wrappers enforce that invariant here so
//! callers cannot forget it.

use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, IPPROTO_IPV6, IPPROTO_TCP, IPV6_V6ONLY, O_NONBLOCK,
    SHUT_WR, SO_ERROR, SO_KEEPALIVE, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, TCP_NODELAY, accept,
    bind, c_int, close, connect, fcntl, getsockname, getsockopt, listen, recv, send, setsockopt,
    shutdown, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socklen_t,
};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;

/// Receives into `buffer`.
///
/// Returns the byte count, `0` at end of stream, or a negative value on
/// error (inspect `errno` via `io::Error::last_os_error`). The socket
/// **must** be non-blocking.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) }
}

/// Sends from `buffer`.
///
/// Returns the byte count or a negative value on error. The socket **must**
/// be non-blocking.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { send(fd, buffer.as_ptr() as *const _, buffer.len(), 0) }
}

/// Closes a socket handle.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Shuts down the outbound half of a connection.
pub(crate) fn sys_shutdown_write(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { shutdown(fd, SHUT_WR) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Sets a socket to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking stream socket for the given address family.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(fd) {
        unsafe { close(fd) };
        return Err(e);
    }

    Ok(fd)
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as listening.
pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> io::Result<()> {
    let rc = unsafe { listen(fd, backlog) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts one pending connection, returning the non-blocking client
/// socket and the peer address.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(client_fd) {
        unsafe { close(client_fd) };
        return Err(e);
    }

    let addr = sockaddr_storage_to_socketaddr(&storage)?;

    Ok((client_fd, addr))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Initiates a non-blocking connect.
///
/// Returns `Ok(true)` when the connection completed immediately and
/// `Ok(false)` when it is in progress; completion is observed as a
/// writability event and checked with [`sys_socket_error`].
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<bool> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Reads and clears the pending error on a socket (`SO_ERROR`).
pub(crate) fn sys_socket_error(fd: RawFd) -> io::Result<c_int> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut _,
            &mut len,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(value)
    }
}

fn set_option(fd: RawFd, level: c_int, option: c_int, enabled: bool) -> io::Result<()> {
    let value: c_int = if enabled { 1 } else { 0 };
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            option,
            &value as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Enables or disables `SO_REUSEADDR`.
pub(crate) fn sys_set_reuseaddr(fd: RawFd, enabled: bool) -> io::Result<()> {
    set_option(fd, SOL_SOCKET, SO_REUSEADDR, enabled)
}

/// Enables or disables `SO_KEEPALIVE`.
pub(crate) fn sys_set_keepalive(fd: RawFd, enabled: bool) -> io::Result<()> {
    set_option(fd, SOL_SOCKET, SO_KEEPALIVE, enabled)
}

/// Enables or disables `TCP_NODELAY`.
pub(crate) fn sys_set_nodelay(fd: RawFd, enabled: bool) -> io::Result<()> {
    set_option(fd, IPPROTO_TCP, TCP_NODELAY, enabled)
}

/// Sets the `IPV6_V6ONLY` option.
///
/// Disabled (the default for listeners), an IPv6-bound socket also accepts
/// IPv4 connections through compatibility mapping.
pub(crate) fn sys_set_v6only(fd: RawFd, v6only: bool) -> io::Result<()> {
    set_option(fd, IPPROTO_IPV6, IPV6_V6ONLY, v6only)
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
