use std::fmt;
use std::sync::Arc;

use crate::buffer::WriteBuffer;
use crate::codec::{Decoder, Encoder, Msg};
use crate::core::poller::{Poller, PollerTask};
use crate::core::state::{CHANNEL_CLOSED, CHANNEL_RUNNING, CHANNEL_SHUTTING, State};
use crate::core::writer::{Writer, WriterTask};
use crate::error::{FrameworkError, Result};
use crate::net::{Loc, Socket};

/// Lifecycle callbacks of an established connection.
///
/// All four calls are invoked from the connection's owning poller thread,
/// so callbacks for a single connection are strictly serialized and need no
/// internal synchronization for per-connection state.
pub trait Handler: Send + Sync {
    /// The connection completed its sentry phase and can carry traffic.
    fn on_connected(&self, channel: &Channel);

    /// A decoded message arrived.
    fn on_received(&self, channel: &Channel, msg: Msg);

    /// A graceful shutdown was requested; the channel still accepts a
    /// final message before the outbound side closes.
    fn on_shutdown(&self, channel: &Channel);

    /// The connection is fully closed and its resources are released.
    /// Implementations may initiate a reconnect here.
    fn on_removed(&self, channel: &Channel);
}

struct ChannelInner {
    socket: Socket,
    encoder: Box<dyn Encoder>,
    decoder: Box<dyn Decoder>,
    handler: Arc<dyn Handler>,
    poller: Arc<Poller>,
    writer: Arc<Writer>,
    loc: Loc,
    state: State,
}

/// The resources bound to one established TCP connection.
///
/// A channel aggregates the socket, its encoder/decoder, its handler, the
/// poller and writer shards the connection is pinned to, and the peer
/// location. It is created once per connection, never mutated, and released
/// when the connection closes. Cloning is shallow.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(
        socket: Socket,
        encoder: Box<dyn Encoder>,
        decoder: Box<dyn Decoder>,
        handler: Arc<dyn Handler>,
        poller: Arc<Poller>,
        writer: Arc<Writer>,
        loc: Loc,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                socket,
                encoder,
                decoder,
                handler,
                poller,
                writer,
                loc,
                state: State::new(CHANNEL_RUNNING),
            }),
        }
    }

    pub fn socket(&self) -> Socket {
        self.inner.socket
    }

    pub fn loc(&self) -> Loc {
        self.inner.loc
    }

    pub(crate) fn encoder(&self) -> &dyn Encoder {
        self.inner.encoder.as_ref()
    }

    pub(crate) fn decoder(&self) -> &dyn Decoder {
        self.inner.decoder.as_ref()
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.inner.handler
    }

    pub(crate) fn poller(&self) -> &Arc<Poller> {
        &self.inner.poller
    }

    pub(crate) fn writer(&self) -> &Arc<Writer> {
        &self.inner.writer
    }

    pub(crate) fn state(&self) -> &State {
        &self.inner.state
    }

    /// Encodes `msg` and hands the bytes to the connection's writer shard.
    ///
    /// May be called from any thread; all writes for this connection are
    /// serialized by the one writer shard it is bound to. Sending is still
    /// permitted while a graceful shutdown drains (the final-message
    /// window), and fails once the channel has closed.
    pub fn send(&self, msg: Msg) -> Result<()> {
        if self.inner.state.get() == CHANNEL_CLOSED {
            return Err(FrameworkError::Network(format!(
                "channel {} is closed",
                self.inner.loc
            )));
        }

        let mut buffer = WriteBuffer::default();
        self.encoder().encode(&mut buffer, &msg)?;
        if buffer.is_empty() {
            return Ok(());
        }

        self.inner.writer.submit(WriterTask::Data {
            socket: self.inner.socket,
            buffer,
        });
        Ok(())
    }

    /// Requests a graceful shutdown.
    ///
    /// Idempotent. The request is routed through the owning poller so that
    /// [`Handler::on_shutdown`] runs on the poller thread; pending outbound
    /// bytes drain before the outbound half closes, and the connection is
    /// torn down once the peer closes its side.
    pub fn shutdown(&self) {
        if !self.inner.state.cas(CHANNEL_RUNNING, CHANNEL_SHUTTING) {
            return;
        }
        self.inner.poller.submit(PollerTask::ShutdownRequest {
            channel: self.clone(),
        });
    }
}

impl PartialEq for Channel {
    /// Channel identity, not value equality: two clones of the same
    /// connection compare equal, two connections never do.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("socket", &self.inner.socket)
            .field("loc", &self.inner.loc)
            .finish()
    }
}
