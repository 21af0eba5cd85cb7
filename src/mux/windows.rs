//! Winsock socket syscall layer.
//!
//! Mirrors the POSIX layer (`unix.rs`) with identical function names and
//! semantics. Winsock is initialized once per process before the first
//! socket is created.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Once;

use windows_sys::Win32::Networking::WinSock::{
    ADDRESS_FAMILY, AF_INET, AF_INET6, FIONBIO, INVALID_SOCKET, IPPROTO_IPV6, IPPROTO_TCP,
    IPV6_V6ONLY, SD_SEND, SO_ERROR, SO_KEEPALIVE, SO_REUSEADDR, SOCK_STREAM, SOCKADDR,
    SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR, SOL_SOCKET, TCP_NODELAY,
    WSADATA, WSAEWOULDBLOCK, WSAGetLastError, WSAStartup, accept, bind, closesocket, connect,
    getsockname, getsockopt, ioctlsocket, listen, recv, send, setsockopt, shutdown, socket,
};

use crate::net::RawSocketHandle;

static WINSOCK_INIT: Once = Once::new();

/// Initializes Winsock exactly once per process.
pub(crate) fn ensure_winsock() {
    WINSOCK_INIT.call_once(|| {
        let mut data: WSADATA = unsafe { mem::zeroed() };
        let rc = unsafe { WSAStartup(0x0202, &mut data) };
        assert!(rc == 0, "WSAStartup failed");
    });
}

fn last_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

pub(crate) fn sys_recv(handle: RawSocketHandle, buffer: &mut [u8]) -> isize {
    let n = unsafe {
        recv(
            handle as SOCKET,
            buffer.as_mut_ptr(),
            buffer.len().min(i32::MAX as usize) as i32,
            0,
        )
    };
    n as isize
}

pub(crate) fn sys_send(handle: RawSocketHandle, buffer: &[u8]) -> isize {
    let n = unsafe {
        send(
            handle as SOCKET,
            buffer.as_ptr(),
            buffer.len().min(i32::MAX as usize) as i32,
            0,
        )
    };
    n as isize
}

pub(crate) fn sys_close(handle: RawSocketHandle) {
    unsafe { closesocket(handle as SOCKET) };
}

pub(crate) fn sys_shutdown_write(handle: RawSocketHandle) -> io::Result<()> {
    let rc = unsafe { shutdown(handle as SOCKET, SD_SEND) };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        Ok(())
    }
}

pub(crate) fn sys_set_nonblocking(handle: RawSocketHandle) -> io::Result<()> {
    let mut nonblocking: u32 = 1;
    let rc = unsafe { ioctlsocket(handle as SOCKET, FIONBIO, &mut nonblocking) };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        Ok(())
    }
}

/// Creates a non-blocking stream socket for the given address family.
pub(crate) fn sys_socket(domain: i32) -> io::Result<RawSocketHandle> {
    ensure_winsock();

    let s = unsafe { socket(domain, SOCK_STREAM, 0) };
    if s == INVALID_SOCKET {
        return Err(last_error());
    }

    if let Err(e) = sys_set_nonblocking(s as RawSocketHandle) {
        unsafe { closesocket(s) };
        return Err(e);
    }

    Ok(s as RawSocketHandle)
}

pub(crate) fn sys_bind(
    handle: RawSocketHandle,
    addr: &SOCKADDR_STORAGE,
    len: i32,
) -> io::Result<()> {
    let rc = unsafe { bind(handle as SOCKET, addr as *const _ as *const SOCKADDR, len) };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        Ok(())
    }
}

pub(crate) fn sys_listen(handle: RawSocketHandle, backlog: i32) -> io::Result<()> {
    let rc = unsafe { listen(handle as SOCKET, backlog) };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        Ok(())
    }
}

pub(crate) fn sys_accept(handle: RawSocketHandle) -> io::Result<(RawSocketHandle, SocketAddr)> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

    let client = unsafe {
        accept(
            handle as SOCKET,
            &mut storage as *mut _ as *mut SOCKADDR,
            &mut len,
        )
    };
    if client == INVALID_SOCKET {
        return Err(last_error());
    }

    if let Err(e) = sys_set_nonblocking(client as RawSocketHandle) {
        unsafe { closesocket(client) };
        return Err(e);
    }

    let addr = sockaddr_storage_to_socketaddr(&storage)?;

    Ok((client as RawSocketHandle, addr))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(handle: RawSocketHandle) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

    let rc = unsafe {
        getsockname(
            handle as SOCKET,
            &mut storage as *mut _ as *mut SOCKADDR,
            &mut len,
        )
    };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Initiates a non-blocking connect; `Ok(false)` means in progress.
pub(crate) fn sys_connect(handle: RawSocketHandle, addr: &SocketAddr) -> io::Result<bool> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe {
        connect(
            handle as SOCKET,
            &storage as *const _ as *const SOCKADDR,
            len,
        )
    };
    if rc == 0 {
        return Ok(true);
    }

    if unsafe { WSAGetLastError() } == WSAEWOULDBLOCK {
        Ok(false)
    } else {
        Err(last_error())
    }
}

pub(crate) fn sys_socket_error(handle: RawSocketHandle) -> io::Result<i32> {
    let mut value: i32 = 0;
    let mut len = mem::size_of::<i32>() as i32;

    let rc = unsafe {
        getsockopt(
            handle as SOCKET,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut u8,
            &mut len,
        )
    };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        Ok(value)
    }
}

fn set_option(handle: RawSocketHandle, level: i32, option: i32, enabled: bool) -> io::Result<()> {
    let value: i32 = if enabled { 1 } else { 0 };
    let rc = unsafe {
        setsockopt(
            handle as SOCKET,
            level,
            option,
            &value as *const _ as *const u8,
            mem::size_of::<i32>() as i32,
        )
    };
    if rc == SOCKET_ERROR {
        Err(last_error())
    } else {
        Ok(())
    }
}

pub(crate) fn sys_set_reuseaddr(handle: RawSocketHandle, enabled: bool) -> io::Result<()> {
    set_option(handle, SOL_SOCKET, SO_REUSEADDR, enabled)
}

pub(crate) fn sys_set_keepalive(handle: RawSocketHandle, enabled: bool) -> io::Result<()> {
    set_option(handle, SOL_SOCKET, SO_KEEPALIVE, enabled)
}

pub(crate) fn sys_set_nodelay(handle: RawSocketHandle, enabled: bool) -> io::Result<()> {
    set_option(handle, IPPROTO_TCP, TCP_NODELAY as i32, enabled)
}

pub(crate) fn sys_set_v6only(handle: RawSocketHandle, v6only: bool) -> io::Result<()> {
    set_option(handle, IPPROTO_IPV6 as i32, IPV6_V6ONLY as i32, v6only)
}

pub(crate) fn sockaddr_storage_to_socketaddr(storage: &SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    match storage.ss_family {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const SOCKADDR_IN) };
            let ip = Ipv4Addr::from(u32::from_be(unsafe { addr.sin_addr.S_un.S_addr }));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const SOCKADDR_IN6) };
            let ip = Ipv6Addr::from(unsafe { addr.sin6_addr.u.Byte });
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                unsafe { addr.Anonymous.sin6_scope_id },
                0,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (SOCKADDR_STORAGE, i32) {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN) };
            sa.sin_family = AF_INET as ADDRESS_FAMILY;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.S_un.S_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<SOCKADDR_IN>() as i32)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN6) };
            sa.sin6_family = AF_INET6 as ADDRESS_FAMILY;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.u.Byte = v6.ip().octets();
            sa.Anonymous.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<SOCKADDR_IN6>() as i32)
        }
    }
}
