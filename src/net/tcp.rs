//! Built-in plain-TCP sentry and protocol.
//!
//! Plain TCP has no handshake of its own: the sentry's only job is to
//! confirm the socket actually connected (dials surface their failure via
//! `SO_ERROR` on the first writability event) and promote. These are the
//! default factories for listeners and dials; a TLS or auth layer would
//! replace them with a sentry that drives its handshake before promoting.

use std::io;
use std::sync::Arc;

use tracing::warn;

use crate::core::{Channel, Directive, Protocol, Sentry, Writer, WriterTask};
use crate::error::{FrameworkError, Result};
use crate::mux::sys;
use crate::net::Socket;

/// Sentry for a connection with no pre-protocol phase.
pub struct TcpSentry {
    socket: Socket,
    writer: Arc<Writer>,
    promoted: bool,
}

impl TcpSentry {
    pub fn new(channel: &Channel) -> Self {
        Self {
            socket: channel.socket(),
            writer: channel.writer().clone(),
            promoted: false,
        }
    }

    /// Checks the pending socket error and asks for promotion.
    fn ready(&self) -> Result<Directive> {
        let err = sys::sys_socket_error(self.socket.raw())
            .map_err(|e| FrameworkError::Native {
                op: "getsockopt",
                source: e,
            })?;
        if err != 0 {
            return Err(FrameworkError::Network(format!(
                "connect failed: {}",
                io::Error::from_raw_os_error(err)
            )));
        }
        Ok(Directive::Promote)
    }
}

impl Sentry for TcpSentry {
    fn on_readable(&mut self, _scratch: &mut [u8]) -> Result<Directive> {
        self.ready()
    }

    fn on_writable(&mut self) -> Result<Directive> {
        self.ready()
    }

    fn to_protocol(&mut self) -> Result<Arc<dyn Protocol>> {
        self.promoted = true;
        Ok(Arc::new(TcpProtocol {
            socket: self.socket,
            writer: self.writer.clone(),
        }))
    }

    fn do_close(&mut self) {
        // After promotion the socket belongs to the protocol; before it,
        // this is the connection's only owner.
        if !self.promoted {
            sys::sys_close(self.socket.raw());
        }
    }
}

/// Protocol moving raw TCP bytes.
pub struct TcpProtocol {
    socket: Socket,
    writer: Arc<Writer>,
}

impl Protocol for TcpProtocol {
    fn on_readable(&self, scratch: &mut [u8]) -> Result<Directive> {
        let n = sys::sys_recv(self.socket.raw(), scratch);
        if n >= 0 {
            return Ok(Directive::Received(n as usize));
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            Ok(Directive::Ignored)
        } else {
            Err(FrameworkError::Native {
                op: "recv",
                source: err,
            })
        }
    }

    fn on_writable(&self) -> Result<Directive> {
        // Pending outbound state lives on the writer shard; forward the
        // readiness there and let it restore the interest when drained.
        self.writer.submit(WriterTask::Writable {
            socket: self.socket,
        });
        Ok(Directive::Ignored)
    }

    fn do_write(&self, data: &[u8]) -> Result<Directive> {
        let mut written = 0usize;
        while written < data.len() {
            let n = sys::sys_send(self.socket.raw(), &data[written..]);
            if n > 0 {
                written += n as usize;
                continue;
            }

            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                break;
            }
            return Err(FrameworkError::Native {
                op: "send",
                source: err,
            });
        }
        Ok(Directive::Received(written))
    }

    fn do_shutdown(&self) {
        if let Err(e) = sys::sys_shutdown_write(self.socket.raw()) {
            warn!(socket = %self.socket, error = %e, "shutdown failed");
        }
    }

    fn do_close(&self) {
        sys::sys_close(self.socket.raw());
    }
}
