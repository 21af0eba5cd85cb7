//! Multiplexer abstraction over the platform readiness facility.
//!
//! Exactly one native facility backs a [`Mux`] instance, selected at
//! compile time for the target OS family:
//! - `epoll` on Linux,
//! - `kqueue` on macOS,
//! - `WSAPoll` on Windows.
//!
//! Building for any other platform fails at compile time, the strongest
//! form of failing fatally at construction rather than per call.
//!
//! All backends behave level-triggered and expose the same contract:
//! register/update/deregister a socket's interest, and a blocking
//! [`wait`](Mux::wait) that is the sole suspension point of the calling
//! shard thread. The only recoverable mid-wait condition is an OS interrupt,
//! which re-enters the wait with a recomputed timeout. Each backend also
//! carries an internal wake channel so other threads can interrupt a
//! blocking wait when they enqueue work.

mod event;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(unix)]
pub(crate) use unix as sys;

#[cfg(windows)]
pub(crate) use windows as sys;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(windows)]
mod wsapoll;

#[cfg(target_os = "linux")]
use epoll::EpollMux as Backend;

#[cfg(target_os = "macos")]
use kqueue::KqueueMux as Backend;

#[cfg(windows)]
use wsapoll::WsaPollMux as Backend;

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
compile_error!("tessera requires a readiness facility: epoll, kqueue, or WSAPoll");

pub use event::{Interest, MuxEvent};

use crate::net::{RawSocketHandle, Socket};

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle used to interrupt a blocking [`Mux::wait`] from another thread.
///
/// Backed by an `eventfd` (Linux), a self-pipe (macOS), or a loopback UDP
/// socket pair (Windows); the wake source is registered in the facility
/// under a reserved token that never collides with a socket handle.
pub struct MuxWaker(pub(crate) RawSocketHandle);

unsafe impl Send for MuxWaker {}
unsafe impl Sync for MuxWaker {}

/// The multiplexer owned by one shard thread.
pub struct Mux {
    backend: Backend,
}

impl Mux {
    /// Creates a multiplexer instance on the platform facility.
    ///
    /// # Panics
    ///
    /// Panics when the facility cannot be initialized; a shard cannot run
    /// without one.
    pub fn new() -> Self {
        Self {
            backend: Backend::new(),
        }
    }

    /// Returns the waker other threads use to interrupt [`wait`](Self::wait).
    pub fn waker(&self) -> Arc<MuxWaker> {
        self.backend.waker()
    }

    /// Registers `socket` with the given initial interest.
    pub fn register(&mut self, socket: Socket, interest: Interest) {
        self.backend.register(socket, interest);
    }

    /// Updates the registered interest for `socket`.
    pub fn update(&mut self, socket: Socket, interest: Interest) {
        self.backend.update(socket, interest);
    }

    /// Removes `socket` from the facility. Safe to call for a handle that
    /// was already deregistered.
    pub fn deregister(&mut self, socket: Socket) {
        self.backend.deregister(socket);
    }

    /// Blocks until at least one registered socket is ready, the waker
    /// fires, or `timeout` expires.
    ///
    /// Readiness is appended to `events` (cleared first), merged per
    /// socket. An OS interrupt re-enters the wait with the remaining
    /// timeout; every other error is unrecoverable and returned.
    pub fn wait(&mut self, events: &mut Vec<MuxEvent>, timeout: Option<Duration>) -> io::Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.backend.poll(events, remaining) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}
