use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::codec::{Decoder, Encoder};
use crate::core::{Channel, Handler, Sentry};
use crate::net::Loc;
use crate::net::tcp::TcpSentry;

fn default_shard_count() -> usize {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cores / 2).max(4)
}

/// Per-socket options applied to listeners and connections.
///
/// `ipv6_only` is off by default: a listener bound to an IPv6 address then
/// also accepts IPv4 connections through compatibility mapping.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    pub reuse_addr: bool,
    pub keep_alive: bool,
    pub tcp_no_delay: bool,
    pub ipv6_only: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reuse_addr: true,
            keep_alive: false,
            tcp_no_delay: true,
            ipv6_only: false,
        }
    }
}

/// Configuration of the net thread (accept loop).
pub struct NetConfig {
    /// Listen backlog for every listener socket.
    pub backlog: i32,
    /// Upper bound on one multiplexer wait.
    pub mux_timeout: Duration,
    /// Bucket count of the listener registry; power of two.
    pub map_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            backlog: 128,
            mux_timeout: Duration::from_millis(100),
            map_size: 16,
        }
    }
}

/// Configuration of the poller shard pool.
pub struct PollerConfig {
    /// Number of poller shards (threads); must be positive.
    pub count: usize,
    /// Upper bound on one multiplexer wait, which is also the worst-case
    /// latency for noticing queued tasks if the wake channel fails.
    pub mux_timeout: Duration,
    /// Size of the per-shard scratch region protocol reads fill.
    pub read_buffer_size: usize,
    /// Bucket count of the per-shard connection registry; power of two.
    pub map_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            count: default_shard_count(),
            mux_timeout: Duration::from_millis(100),
            read_buffer_size: 16 * 1024,
            map_size: 1024,
        }
    }
}

/// Configuration of the writer shard pool.
pub struct WriterConfig {
    /// Number of writer shards (threads); must be positive.
    pub count: usize,
    /// Bucket count of the per-shard write-state registry; power of two.
    pub map_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            count: default_shard_count(),
            map_size: 1024,
        }
    }
}

/// Builds the per-connection encoder.
pub type EncoderFactory = Box<dyn Fn() -> Box<dyn Encoder> + Send + Sync>;
/// Builds the per-connection decoder.
pub type DecoderFactory = Box<dyn Fn() -> Box<dyn Decoder> + Send + Sync>;
/// Builds the sentry guarding a new connection's pre-protocol phase.
pub type SentryFactory = Box<dyn Fn(&Channel) -> Box<dyn Sentry> + Send + Sync>;

/// Everything needed to accept connections on one bound address.
pub struct ListenerConfig {
    pub loc: Loc,
    pub socket_config: SocketConfig,
    pub handler: Arc<dyn Handler>,
    pub encoder_factory: EncoderFactory,
    pub decoder_factory: DecoderFactory,
    pub sentry_factory: SentryFactory,
}

impl ListenerConfig {
    /// A listener with the plain-TCP sentry and default socket options.
    pub fn new(
        loc: Loc,
        encoder_factory: EncoderFactory,
        decoder_factory: DecoderFactory,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            loc,
            socket_config: SocketConfig::default(),
            handler,
            encoder_factory,
            decoder_factory,
            sentry_factory: Box::new(|channel| Box::new(TcpSentry::new(channel))),
        }
    }

    pub fn with_socket_config(mut self, socket_config: SocketConfig) -> Self {
        self.socket_config = socket_config;
        self
    }

    pub fn with_sentry_factory(mut self, sentry_factory: SentryFactory) -> Self {
        self.sentry_factory = sentry_factory;
        self
    }
}
