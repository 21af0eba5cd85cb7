use crate::net::Socket;

/// Readiness interest registered for a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Registered but silent; no readiness events are delivered.
    None,
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    pub fn readable(self) -> bool {
        matches!(self, Interest::Read | Interest::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Interest::Write | Interest::ReadWrite)
    }
}

/// A readiness event reported by the multiplexer.
///
/// Indicates that `socket` can be read from, written to, or both, without
/// blocking. Error and hang-up conditions surface as readability so the
/// subsequent read observes the failure.
#[derive(Debug, Clone, Copy)]
pub struct MuxEvent {
    pub socket: Socket,
    pub readable: bool,
    pub writable: bool,
}
