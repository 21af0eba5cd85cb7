use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::codec::Msg;
use crate::core::channel::Channel;
use crate::core::state::CHANNEL_CLOSED;
use crate::core::writer::WriterTask;
use crate::error::{Result, UNREACHED};
use crate::mux::Interest;
use crate::net::Socket;

/// Raw directive: no readiness change.
pub const NET_IGNORED: i64 = -1;
/// Raw directive: promote the connection to its protocol phase.
pub const NET_UPDATE: i64 = -2;
/// Raw directive: re-arm for read events.
pub const NET_R: i64 = -3;
/// Raw directive: re-arm for write events.
pub const NET_W: i64 = -4;
/// Raw directive: re-arm for both.
pub const NET_RW: i64 = -5;

/// The normalized result of a sentry/protocol event callback.
///
/// A directive is either a byte count or one of a small set of control
/// sentinels. On the wire-adjacent boundary it travels as a single integer:
/// counts occupy the non-negative range and sentinels the negative range,
/// so one value carries both unambiguously (see [`from_raw`](Self::from_raw)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `n` bytes were processed or made available.
    Received(usize),
    /// No readiness registration change.
    Ignored,
    /// Sentry phase complete; replace the node with its protocol form.
    Promote,
    /// Update the registered readiness interest.
    Rearm(Interest),
}

impl Directive {
    /// Decodes a raw integer directive.
    ///
    /// # Panics
    ///
    /// Panics on an unrecognized value: an unknown directive is a
    /// programming-contract violation, never silently dropped.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            n if n >= 0 => Directive::Received(n as usize),
            NET_IGNORED => Directive::Ignored,
            NET_UPDATE => Directive::Promote,
            NET_R => Directive::Rearm(Interest::Read),
            NET_W => Directive::Rearm(Interest::Write),
            NET_RW => Directive::Rearm(Interest::ReadWrite),
            _ => panic!("{UNREACHED}: unrecognized directive {raw}"),
        }
    }

    /// Encodes the directive as its raw integer form.
    pub fn into_raw(self) -> i64 {
        match self {
            Directive::Received(n) => n as i64,
            Directive::Ignored => NET_IGNORED,
            Directive::Promote => NET_UPDATE,
            Directive::Rearm(Interest::Read) => NET_R,
            Directive::Rearm(Interest::Write) => NET_W,
            Directive::Rearm(Interest::ReadWrite) => NET_RW,
            Directive::Rearm(Interest::None) => panic!("{UNREACHED}: rearm-none directive"),
        }
    }
}

/// The pre-protocol phase of a connection: handshake and authentication.
///
/// Reacts to readiness events until its handshake completes, then asks for
/// promotion with [`Directive::Promote`]. A sentry that needs the socket
/// reads it itself; `scratch` is the shard's reusable read region.
pub trait Sentry: Send {
    fn on_readable(&mut self, scratch: &mut [u8]) -> Result<Directive>;

    fn on_writable(&mut self) -> Result<Directive>;

    /// Builds the protocol taking over the connection. Consumed exactly
    /// once, during promotion.
    fn to_protocol(&mut self) -> Result<Arc<dyn Protocol>>;

    /// Releases sentry-phase resources. Called exactly once: after a
    /// successful promotion, or when the connection dies before promoting
    /// (in which case the socket itself must be released here too).
    fn do_close(&mut self);
}

/// The established phase of a connection.
///
/// Shared between the owning poller thread (readable/writable events) and
/// the owning writer thread (`do_write`/`do_shutdown`); implementations
/// hold no mutable state or synchronize it internally.
pub trait Protocol: Send + Sync {
    /// Handles a readable event. `Received(n)` means `n` bytes were placed
    /// into `scratch` (`0` = end of stream); the engine forwards them to
    /// the connection's decoder.
    fn on_readable(&self, scratch: &mut [u8]) -> Result<Directive>;

    /// Handles a writable event, driving pending outbound data.
    fn on_writable(&self) -> Result<Directive>;

    /// Writes `data` to the socket; `Received(n)` reports the bytes the
    /// socket accepted. Runs on the connection's writer thread.
    fn do_write(&self, data: &[u8]) -> Result<Directive>;

    /// Closes the outbound half for a graceful shutdown. Failures are
    /// logged, never propagated.
    fn do_shutdown(&self);

    /// Releases the connection's resources, including the socket. Failures
    /// are logged, never propagated.
    fn do_close(&self);
}

/// What the shard loop should do after an event was dispatched to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeVerdict {
    Continue,
    Rearm(Interest),
    Promote,
    Close,
}

static NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> u64 {
    NODE_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct SentryNode {
    id: u64,
    channel: Channel,
    sentry: Box<dyn Sentry>,
    interest: Interest,
}

impl SentryNode {
    pub(crate) fn to_protocol(&mut self) -> Result<Arc<dyn Protocol>> {
        self.sentry.to_protocol()
    }

    /// Releases the displaced sentry after its protocol took over.
    pub(crate) fn close_after_promotion(mut self) {
        self.sentry.do_close();
        debug!(socket = %self.channel.socket(), "sentry retired after promotion");
    }

    fn handle(&mut self, result: Result<Directive>) -> NodeVerdict {
        match result {
            Err(e) => {
                error!(socket = %self.channel.socket(), error = %e, "sentry event failed");
                NodeVerdict::Close
            }
            Ok(Directive::Promote) => NodeVerdict::Promote,
            Ok(Directive::Rearm(interest)) if interest != Interest::None => {
                NodeVerdict::Rearm(interest)
            }
            Ok(Directive::Ignored) => NodeVerdict::Continue,
            Ok(other) => panic!("{UNREACHED}: sentry directive {:?}", other),
        }
    }
}

pub(crate) struct ProtocolNode {
    id: u64,
    channel: Channel,
    protocol: Arc<dyn Protocol>,
    interest: Interest,
    /// Unconsumed inbound bytes carried between reads while the decoder
    /// waits for a complete message.
    carrier: Option<WriteBuffer>,
}

impl ProtocolNode {
    fn on_readable(&mut self, scratch: &mut [u8]) -> NodeVerdict {
        let directive = match self.protocol.on_readable(scratch) {
            Err(e) => {
                error!(socket = %self.channel.socket(), error = %e, "protocol read failed");
                return NodeVerdict::Close;
            }
            Ok(d) => d,
        };

        match directive {
            Directive::Received(0) => {
                debug!(socket = %self.channel.socket(), "peer closed the connection");
                NodeVerdict::Close
            }
            Directive::Received(n) => match self.handle_received(&scratch[..n]) {
                Ok(()) => NodeVerdict::Continue,
                Err(e) => {
                    error!(socket = %self.channel.socket(), error = %e, "decode failed");
                    NodeVerdict::Close
                }
            },
            Directive::Rearm(interest) if interest != Interest::None => {
                NodeVerdict::Rearm(interest)
            }
            Directive::Ignored => NodeVerdict::Continue,
            other => panic!("{UNREACHED}: protocol read directive {:?}", other),
        }
    }

    fn on_writable(&mut self) -> NodeVerdict {
        match self.protocol.on_writable() {
            Err(e) => {
                error!(socket = %self.channel.socket(), error = %e, "protocol write event failed");
                NodeVerdict::Close
            }
            // Byte counts from a writable event carry no follow-up work.
            Ok(Directive::Received(_)) | Ok(Directive::Ignored) => NodeVerdict::Continue,
            Ok(Directive::Rearm(interest)) if interest != Interest::None => {
                NodeVerdict::Rearm(interest)
            }
            Ok(other) => panic!("{UNREACHED}: protocol write directive {:?}", other),
        }
    }

    /// Feeds `data` (plus any carried-over remainder) to the decoder and
    /// dispatches the decoded messages.
    fn handle_received(&mut self, data: &[u8]) -> Result<()> {
        let mut msgs: Vec<Msg> = Vec::new();

        match self.carrier.take() {
            Some(mut carrier) => {
                carrier.write_bytes(data);
                let consumed = {
                    let mut buffer = ReadBuffer::new(carrier.content());
                    self.channel.decoder().decode(&mut buffer, &mut msgs)?;
                    buffer.read_index()
                };
                if consumed < carrier.write_index() {
                    self.carrier = Some(carrier.truncate(consumed));
                }
            }
            None => {
                let mut buffer = ReadBuffer::new(data);
                self.channel.decoder().decode(&mut buffer, &mut msgs)?;
                let consumed = buffer.read_index();
                if consumed < data.len() {
                    let mut carrier = WriteBuffer::new_heap((data.len() - consumed).max(32));
                    carrier.write_bytes(&data[consumed..]);
                    self.carrier = Some(carrier);
                }
            }
        }

        for msg in msgs {
            self.channel.handler().on_received(&self.channel, msg);
        }
        Ok(())
    }
}

/// A registry entry: the state machine owning one registered socket.
///
/// Closed over its two variants; dispatch is a single match on the variant
/// tag, and promotion replaces one variant with the other under the same
/// registry key.
pub(crate) enum PollerNode {
    Sentry(SentryNode),
    Protocol(ProtocolNode),
}

impl PollerNode {
    /// Wraps a fresh connection. The initial interest is `Write`: for a
    /// dial, writability reports connect completion; for an accepted
    /// socket, the immediate writable event triggers the first sentry step.
    pub(crate) fn new_sentry(channel: Channel, sentry: Box<dyn Sentry>) -> Self {
        PollerNode::Sentry(SentryNode {
            id: next_node_id(),
            channel,
            sentry,
            interest: Interest::Write,
        })
    }

    pub(crate) fn new_protocol(channel: Channel, protocol: Arc<dyn Protocol>) -> Self {
        PollerNode::Protocol(ProtocolNode {
            id: next_node_id(),
            channel,
            protocol,
            interest: Interest::Read,
            carrier: None,
        })
    }

    /// Node identity. Registry removal matches on it, which is what makes
    /// close single-owner under handle reuse.
    pub(crate) fn id(&self) -> u64 {
        match self {
            PollerNode::Sentry(n) => n.id,
            PollerNode::Protocol(n) => n.id,
        }
    }

    pub(crate) fn channel(&self) -> &Channel {
        match self {
            PollerNode::Sentry(n) => &n.channel,
            PollerNode::Protocol(n) => &n.channel,
        }
    }

    pub(crate) fn socket(&self) -> Socket {
        self.channel().socket()
    }

    pub(crate) fn interest(&self) -> Interest {
        match self {
            PollerNode::Sentry(n) => n.interest,
            PollerNode::Protocol(n) => n.interest,
        }
    }

    pub(crate) fn set_interest(&mut self, interest: Interest) {
        match self {
            PollerNode::Sentry(n) => n.interest = interest,
            PollerNode::Protocol(n) => n.interest = interest,
        }
    }

    pub(crate) fn as_sentry_mut(&mut self) -> Option<&mut SentryNode> {
        match self {
            PollerNode::Sentry(n) => Some(n),
            PollerNode::Protocol(_) => None,
        }
    }

    pub(crate) fn is_protocol(&self) -> bool {
        matches!(self, PollerNode::Protocol(_))
    }

    pub(crate) fn on_readable(&mut self, scratch: &mut [u8]) -> NodeVerdict {
        match self {
            PollerNode::Sentry(n) => {
                let result = n.sentry.on_readable(scratch);
                n.handle(result)
            }
            PollerNode::Protocol(n) => n.on_readable(scratch),
        }
    }

    pub(crate) fn on_writable(&mut self) -> NodeVerdict {
        match self {
            PollerNode::Sentry(n) => {
                let result = n.sentry.on_writable();
                n.handle(result)
            }
            PollerNode::Protocol(n) => n.on_writable(),
        }
    }

    /// Releases the resources this node owns.
    ///
    /// Only ever reached through a successful registry removal (or the
    /// shard's final drain), which is the single authorization for release:
    /// the thread that won the removal is the only one that gets here.
    pub(crate) fn release(self) {
        match self {
            PollerNode::Sentry(mut n) => {
                n.sentry.do_close();
                debug!(socket = %n.channel.socket(), "sentry connection closed");
            }
            PollerNode::Protocol(n) => {
                n.channel.state().set(CHANNEL_CLOSED);
                n.channel.writer().submit(WriterTask::Close {
                    socket: n.channel.socket(),
                });
                n.protocol.do_close();
                n.channel.handler().on_removed(&n.channel);
                debug!(socket = %n.channel.socket(), loc = %n.channel.loc(), "connection closed");
            }
        }
    }
}

impl PartialEq for PollerNode {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
