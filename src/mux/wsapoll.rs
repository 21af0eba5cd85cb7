//! Windows `WSAPoll` multiplexer backend.
//!
//! WSAPoll carries no per-handle payload and no kernel-side registration,
//! so this backend keeps its own interest table and rebuilds the pollfd
//! array per wait. A connected loopback UDP socket pair serves as the wake
//! source. Like the other backends it is readiness-based and
//! level-triggered.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use windows_sys::Win32::Networking::WinSock::{
    POLLERR, POLLHUP, POLLRDNORM, POLLWRNORM, SOCKET, SOCKET_ERROR, WSAPOLLFD, WSAPoll, recv,
    send,
};

use super::windows::{ensure_winsock, sys_bind, sys_close, sys_connect, socketaddr_to_storage};
use super::{Interest, MuxEvent, MuxWaker};
use crate::net::{RawSocketHandle, Socket};

pub(crate) struct WsaPollMux {
    /// Registered handles and their current interest.
    reg: HashMap<RawSocketHandle, Interest>,

    /// Reusable pollfd array.
    fds: Vec<WSAPOLLFD>,

    /// Receive side of the wake socket pair, polled for readability.
    wake_recv: RawSocketHandle,

    /// Waker wrapping the send side of the wake socket pair.
    waker: Arc<MuxWaker>,
}

unsafe impl Send for WsaPollMux {}

impl MuxWaker {
    /// Interrupts a blocking `WSAPoll` by sending one byte on the wake pair.
    pub fn wake(&self) {
        let buf = [1u8; 1];
        unsafe {
            send(self.0 as SOCKET, buf.as_ptr(), 1, 0);
        }
    }
}

fn interest_events(interest: Interest) -> i16 {
    let mut events = 0;
    if interest.readable() {
        events |= POLLRDNORM;
    }
    if interest.writable() {
        events |= POLLWRNORM;
    }
    events
}

/// Creates a connected loopback UDP socket pair used for wake-ups.
fn wake_pair() -> (RawSocketHandle, RawSocketHandle) {
    const UDP: i32 = 17;

    let recv_sock = unsafe {
        windows_sys::Win32::Networking::WinSock::socket(
            windows_sys::Win32::Networking::WinSock::AF_INET as i32,
            windows_sys::Win32::Networking::WinSock::SOCK_DGRAM,
            UDP,
        )
    } as RawSocketHandle;

    let any = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
    let (storage, len) = socketaddr_to_storage(&any);
    sys_bind(recv_sock, &storage, len).expect("wake socket bind failed");

    let mut name: windows_sys::Win32::Networking::WinSock::SOCKADDR_STORAGE =
        unsafe { mem::zeroed() };
    let mut name_len = mem::size_of_val(&name) as i32;
    let rc = unsafe {
        windows_sys::Win32::Networking::WinSock::getsockname(
            recv_sock as SOCKET,
            &mut name as *mut _ as *mut _,
            &mut name_len,
        )
    };
    assert!(rc != SOCKET_ERROR, "wake socket name lookup failed");
    let bound =
        super::windows::sockaddr_storage_to_socketaddr(&name).expect("wake socket address");

    let send_sock = unsafe {
        windows_sys::Win32::Networking::WinSock::socket(
            windows_sys::Win32::Networking::WinSock::AF_INET as i32,
            windows_sys::Win32::Networking::WinSock::SOCK_DGRAM,
            UDP,
        )
    } as RawSocketHandle;
    sys_connect(send_sock, &bound).expect("wake socket connect failed");

    for handle in [recv_sock, send_sock] {
        super::windows::sys_set_nonblocking(handle).expect("wake socket nonblocking");
    }

    (recv_sock, send_sock)
}

impl WsaPollMux {
    pub(crate) fn new() -> Self {
        ensure_winsock();

        let (wake_recv, wake_send) = wake_pair();

        Self {
            reg: HashMap::new(),
            fds: Vec::new(),
            wake_recv,
            waker: Arc::new(MuxWaker(wake_send)),
        }
    }

    pub(crate) fn waker(&self) -> Arc<MuxWaker> {
        self.waker.clone()
    }

    pub(crate) fn register(&mut self, socket: Socket, interest: Interest) {
        self.reg.insert(socket.raw(), interest);
    }

    pub(crate) fn update(&mut self, socket: Socket, interest: Interest) {
        self.reg.insert(socket.raw(), interest);
    }

    pub(crate) fn deregister(&mut self, socket: Socket) {
        self.reg.remove(&socket.raw());
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<MuxEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        self.fds.clear();
        self.fds.push(WSAPOLLFD {
            fd: self.wake_recv as SOCKET,
            events: POLLRDNORM,
            revents: 0,
        });
        for (&handle, &interest) in &self.reg {
            self.fds.push(WSAPOLLFD {
                fd: handle as SOCKET,
                events: interest_events(interest),
                revents: 0,
            });
        }

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = unsafe { WSAPoll(self.fds.as_mut_ptr(), self.fds.len() as u32, timeout_ms) };
        if n == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }

        events.clear();

        for fd in &self.fds {
            if fd.revents == 0 {
                continue;
            }

            if fd.fd == self.wake_recv as SOCKET {
                let mut buf = [0u8; 8];
                unsafe {
                    recv(self.wake_recv as SOCKET, buf.as_mut_ptr(), buf.len() as i32, 0);
                }
                continue;
            }

            let readable = fd.revents & (POLLRDNORM | POLLERR | POLLHUP) != 0;
            let writable = fd.revents & POLLWRNORM != 0;

            events.push(MuxEvent {
                socket: Socket::new(fd.fd as RawSocketHandle),
                readable,
                writable,
            });
        }

        Ok(())
    }
}

impl Drop for WsaPollMux {
    fn drop(&mut self) {
        sys_close(self.waker.0);
        sys_close(self.wake_recv);
    }
}
