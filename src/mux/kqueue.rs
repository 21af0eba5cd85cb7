//! macOS `kqueue` multiplexer backend.
//!
//! Mirrors the epoll backend on the BSD facility: read/write interest maps
//! to the `EVFILT_READ`/`EVFILT_WRITE` filters (added enabled or disabled so
//! interest updates are plain re-adds), and a non-blocking self-pipe serves
//! as the wake source.

use libc::{
    EV_ADD, EV_DELETE, EV_DISABLE, EV_ENABLE, EV_EOF, EVFILT_READ, EVFILT_WRITE, kevent, kqueue,
    timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use super::{Interest, MuxEvent, MuxWaker};
use crate::net::Socket;

pub(crate) struct KqueueMux {
    kq: RawFd,

    /// Reusable buffer for `kevent` results.
    events: Vec<libc::kevent>,

    /// Read end of the wake pipe, registered in the kqueue.
    wake_read: RawFd,

    /// Waker wrapping the write end of the wake pipe.
    waker: Arc<MuxWaker>,
}

unsafe impl Send for KqueueMux {}

impl MuxWaker {
    /// Interrupts a blocking `kevent` by writing one byte to the pipe.
    pub fn wake(&self) {
        let buf = [1u8; 1];
        unsafe {
            libc::write(self.0, buf.as_ptr() as *const _, 1);
        }
    }
}

fn change(ident: RawFd, filter: i16, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: ident as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

impl KqueueMux {
    pub(crate) fn new() -> Self {
        let kq = unsafe { kqueue() };
        assert!(kq >= 0, "kqueue failed");

        let mut pipe_fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe(pipe_fds.as_mut_ptr()) };
        assert!(rc == 0, "wake pipe failed");
        for fd in pipe_fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }

        let changes = [change(pipe_fds[0], EVFILT_READ, EV_ADD | EV_ENABLE)];
        let rc = unsafe { kevent(kq, changes.as_ptr(), 1, ptr::null_mut(), 0, ptr::null()) };
        assert!(rc == 0, "failed to register wake pipe");

        Self {
            kq,
            events: Vec::with_capacity(1024),
            wake_read: pipe_fds[0],
            waker: Arc::new(MuxWaker(pipe_fds[1])),
        }
    }

    pub(crate) fn waker(&self) -> Arc<MuxWaker> {
        self.waker.clone()
    }

    fn apply(&self, socket: Socket, interest: Interest) {
        let fd = socket.raw();
        let changes = [
            change(
                fd,
                EVFILT_READ,
                EV_ADD | if interest.readable() { EV_ENABLE } else { EV_DISABLE },
            ),
            change(
                fd,
                EVFILT_WRITE,
                EV_ADD | if interest.writable() { EV_ENABLE } else { EV_DISABLE },
            ),
        ];
        let rc = unsafe { kevent(self.kq, changes.as_ptr(), 2, ptr::null_mut(), 0, ptr::null()) };
        debug_assert_eq!(rc, 0, "kevent failed: {}", io::Error::last_os_error());
    }

    pub(crate) fn register(&mut self, socket: Socket, interest: Interest) {
        self.apply(socket, interest);
    }

    pub(crate) fn update(&mut self, socket: Socket, interest: Interest) {
        self.apply(socket, interest);
    }

    pub(crate) fn deregister(&mut self, socket: Socket) {
        let fd = socket.raw();
        let changes = [
            change(fd, EVFILT_READ, EV_DELETE),
            change(fd, EVFILT_WRITE, EV_DELETE),
        ];
        // Deleting filters that were never added reports ENOENT; the handle
        // is gone either way.
        unsafe { kevent(self.kq, changes.as_ptr(), 2, ptr::null_mut(), 0, ptr::null()) };
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<MuxEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs() as _,
            tv_nsec: t.subsec_nanos() as _,
        });

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts.as_ref().map(|t| t as *const _).unwrap_or(ptr::null()),
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
            if ev.ident as RawFd == self.wake_read {
                let mut buf = [0u8; 8];
                unsafe {
                    libc::read(self.wake_read, buf.as_mut_ptr() as *mut _, buf.len());
                }
                continue;
            }

            let socket = Socket::new(ev.ident as RawFd);

            let readable = ev.filter == EVFILT_READ || ev.flags & EV_EOF != 0;
            let writable = ev.filter == EVFILT_WRITE;

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

impl Drop for KqueueMux {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.waker.0);
            libc::close(self.wake_read);
            libc::close(self.kq);
        }
    }
}
