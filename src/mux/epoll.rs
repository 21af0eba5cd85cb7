//! Linux `epoll` multiplexer backend.
//!
//! Owns the epoll instance, a reusable `epoll_event` buffer, and an
//! `eventfd` registered as a persistent wake source under a reserved token.
//! Socket handles are carried in the event payload directly, so a readiness
//! event maps back to its registry key without any lookup table.

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use super::{Interest, MuxEvent, MuxWaker};
use crate::net::Socket;

/// Reserved payload for the wake eventfd.
///
/// Socket handles are small non-negative integers, so `u64::MAX` can never
/// collide with one.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct EpollMux {
    epfd: RawFd,

    /// Reusable buffer for `epoll_wait` results.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<MuxWaker>,
}

unsafe impl Send for EpollMux {}

impl MuxWaker {
    /// Interrupts a blocking `epoll_wait` by writing to the eventfd.
    pub fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = 0;
    if interest.readable() {
        flags |= EPOLLIN;
    }
    if interest.writable() {
        flags |= EPOLLOUT;
    }
    flags as u32
}

impl EpollMux {
    pub(crate) fn new() -> Self {
        let epfd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        assert!(epfd >= 0, "epoll_create1 failed");

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(eventfd >= 0, "eventfd failed");

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let rc = unsafe { epoll_ctl(epfd, EPOLL_CTL_ADD, eventfd, &mut event) };
        assert!(rc == 0, "failed to register wake eventfd");

        Self {
            epfd,
            events: Vec::with_capacity(1024),
            waker: Arc::new(MuxWaker(eventfd)),
        }
    }

    pub(crate) fn waker(&self) -> Arc<MuxWaker> {
        self.waker.clone()
    }

    fn ctl(&self, op: libc::c_int, socket: Socket, interest: Interest) {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: socket.raw() as u64,
        };
        let rc = unsafe { epoll_ctl(self.epfd, op, socket.raw(), &mut event) };
        debug_assert_eq!(rc, 0, "epoll_ctl failed: {}", io::Error::last_os_error());
    }

    pub(crate) fn register(&mut self, socket: Socket, interest: Interest) {
        self.ctl(EPOLL_CTL_ADD, socket, interest);
    }

    pub(crate) fn update(&mut self, socket: Socket, interest: Interest) {
        self.ctl(EPOLL_CTL_MOD, socket, interest);
    }

    pub(crate) fn deregister(&mut self, socket: Socket) {
        unsafe {
            epoll_ctl(self.epfd, EPOLL_CTL_DEL, socket.raw(), std::ptr::null_mut());
        }
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<MuxEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        events.clear();

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, &mut buf as *mut _ as *mut _, 8);
                }
                continue;
            }

            let socket = Socket::new(ev.u64 as RawFd);

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & (EPOLLOUT as u32) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.socket == socket) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(MuxEvent {
                    socket,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }
}

impl Drop for EpollMux {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.waker.0);
            libc::close(self.epfd);
        }
    }
}
