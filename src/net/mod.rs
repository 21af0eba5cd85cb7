//! Lifecycle owner, listeners, and dialing.
//!
//! [`Net`] owns the shard pools and the accept loop. It is the only
//! component with a process-wide invariant: at most one instance may be
//! live at a time. Everything else (poller shards, writer shards, the net
//! thread's listener registry) hangs off the one `Net`.
//!
//! The net thread multiplexes the listener sockets, accepts connections,
//! assigns each one a poller and a writer shard round-robin, and hands the
//! new sentry node to its owning poller. It performs no per-connection I/O
//! itself.

mod config;
mod loc;
mod socket;

pub mod tcp;

pub use config::{
    DecoderFactory, EncoderFactory, ListenerConfig, NetConfig, PollerConfig, SentryFactory,
    SocketConfig, WriterConfig,
};
pub use loc::Loc;
pub use socket::{RawSocketHandle, Socket};

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tracing::{debug, error, info, warn};

use crate::codec::{Decoder, Encoder};
use crate::core::state::{INITIAL, RUNNING, STOPPED};
use crate::core::{
    Channel, Handler, LifeCycle, Poller, PollerTask, PollerNode, Sentry, Writer, WriterTask,
};
use crate::error::{FrameworkError, Result, UNREACHED};
use crate::map::IntMap;
use crate::mux::{Interest, Mux, MuxEvent, MuxWaker, sys};
use crate::net::socket::configure_connection;
use crate::net::tcp::TcpSentry;

/// One live `Net` per process.
static INSTANCE_FLAG: AtomicBool = AtomicBool::new(false);

enum NetTask {
    AddListener(ListenerContext),
    Exit,
}

struct ListenerContext {
    socket: Socket,
    config: ListenerConfig,
}

/// The shard pools and the round-robin assignment counters.
struct Shards {
    pollers: Vec<Arc<Poller>>,
    writers: Vec<Arc<Writer>>,
    poller_seq: AtomicUsize,
    writer_seq: AtomicUsize,
}

impl Shards {
    fn next_poller(&self) -> &Arc<Poller> {
        let i = self.poller_seq.fetch_add(1, Ordering::Relaxed);
        &self.pollers[i % self.pollers.len()]
    }

    fn next_writer(&self) -> &Arc<Writer> {
        let i = self.writer_seq.fetch_add(1, Ordering::Relaxed);
        &self.writers[i % self.writers.len()]
    }
}

/// The top-level lifecycle owner.
///
/// Creates and starts the poller/writer pools and the net (accept) thread,
/// registers listeners, dials outbound connections, and tears everything
/// down on [`exit`](LifeCycle::exit). Dropping a running `Net` performs the
/// same orderly teardown.
pub struct Net {
    state: AtomicI32,
    shards: Arc<Shards>,
    queue: Arc<SegQueue<NetTask>>,
    waker: Arc<MuxWaker>,
    backlog: i32,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Net {
    /// Builds the engine: poller shards, writer shards, and the net thread.
    ///
    /// # Panics
    ///
    /// Panics when another `Net` is already live in this process, or when a
    /// shard count is zero.
    pub fn new(
        net_config: NetConfig,
        poller_config: PollerConfig,
        writer_config: WriterConfig,
    ) -> Self {
        assert!(poller_config.count > 0, "poller instances cannot be zero");
        assert!(writer_config.count > 0, "writer instances cannot be zero");
        assert!(
            INSTANCE_FLAG
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "{UNREACHED}: a net instance already exists"
        );

        let shards = Arc::new(Shards {
            pollers: (0..poller_config.count)
                .map(|_| Poller::new(&poller_config))
                .collect(),
            writers: (0..writer_config.count)
                .map(|_| Writer::new(&writer_config))
                .collect(),
            poller_seq: AtomicUsize::new(0),
            writer_seq: AtomicUsize::new(0),
        });

        let mux = Mux::new();
        let waker = mux.waker();
        let queue = Arc::new(SegQueue::new());

        let core = NetCore {
            mux,
            listeners: IntMap::new(net_config.map_size),
            queue: queue.clone(),
            shards: shards.clone(),
            timeout: net_config.mux_timeout,
        };

        let handle = thread::Builder::new()
            .name("net".to_string())
            .spawn(move || core.run())
            .expect("failed to spawn net thread");

        Self {
            state: AtomicI32::new(INITIAL),
            shards,
            queue,
            waker,
            backlog: net_config.backlog,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Binds a listener and registers it with the net thread.
    ///
    /// Returns the actually bound location (meaningful when binding port
    /// `0`). Allowed until the engine has exited.
    pub fn add_listener(&self, config: ListenerConfig) -> Result<Loc> {
        assert!(
            self.state.load(Ordering::Acquire) <= RUNNING,
            "{UNREACHED}: listener added after exit"
        );

        let loc = config.loc;
        let addr = loc.socket_addr();
        let raw = sys::sys_socket(loc.domain()).map_err(|e| FrameworkError::Native {
            op: "socket",
            source: e,
        })?;

        let bound = (|| {
            sys::sys_set_reuseaddr(raw, config.socket_config.reuse_addr)?;
            if addr.is_ipv6() {
                sys::sys_set_v6only(raw, config.socket_config.ipv6_only)?;
            }
            let (storage, len) = sys::socketaddr_to_storage(&addr);
            sys::sys_bind(raw, &storage, len)?;
            sys::sys_listen(raw, self.backlog)
        })();
        let bound = bound.and_then(|_| sys::sys_sockname(raw));
        let bound = match bound {
            Ok(addr) => Loc::from(addr),
            Err(e) => {
                sys::sys_close(raw);
                return Err(FrameworkError::Native {
                    op: "bind/listen",
                    source: e,
                });
            }
        };

        self.queue.push(NetTask::AddListener(ListenerContext {
            socket: Socket::new(raw),
            config,
        }));
        self.waker.wake();
        info!(loc = %bound, "listener bound");
        Ok(bound)
    }

    /// Dials `loc` with the plain-TCP sentry.
    pub fn connect(
        &self,
        loc: Loc,
        encoder: Box<dyn Encoder>,
        decoder: Box<dyn Decoder>,
        handler: Arc<dyn Handler>,
        socket_config: SocketConfig,
    ) -> Result<()> {
        self.connect_with(loc, encoder, decoder, handler, socket_config, &|channel| {
            Box::new(TcpSentry::new(channel))
        })
    }

    /// Dials `loc` with a custom sentry guarding the pre-protocol phase.
    ///
    /// The connection is registered awaiting writability; connect
    /// completion (or failure) surfaces as the sentry's first event.
    pub fn connect_with(
        &self,
        loc: Loc,
        encoder: Box<dyn Encoder>,
        decoder: Box<dyn Decoder>,
        handler: Arc<dyn Handler>,
        socket_config: SocketConfig,
        sentry_factory: &dyn Fn(&Channel) -> Box<dyn Sentry>,
    ) -> Result<()> {
        assert!(
            self.state.load(Ordering::Acquire) <= RUNNING,
            "{UNREACHED}: connect after exit"
        );

        let raw = sys::sys_socket(loc.domain()).map_err(|e| FrameworkError::Native {
            op: "socket",
            source: e,
        })?;
        let socket = Socket::new(raw);

        let dialed = (|| {
            configure_connection(socket, &socket_config)?;
            sys::sys_connect(raw, &loc.socket_addr())
        })();
        if let Err(e) = dialed {
            sys::sys_close(raw);
            return Err(FrameworkError::Native {
                op: "connect",
                source: e,
            });
        }

        let channel = Channel::new(
            socket,
            encoder,
            decoder,
            handler,
            self.shards.next_poller().clone(),
            self.shards.next_writer().clone(),
            loc,
        );
        let sentry = sentry_factory(&channel);
        let node = PollerNode::new_sentry(channel.clone(), sentry);
        channel.poller().submit(PollerTask::Register(node));
        debug!(%loc, %socket, "dial registered");
        Ok(())
    }

    fn teardown(&self) {
        self.queue.push(NetTask::Exit);
        self.waker.wake();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        // Pollers go first: their final drain hands writer shards the
        // per-connection close tasks, which must still be deliverable.
        for poller in &self.shards.pollers {
            poller.submit(PollerTask::Exit);
        }
        for poller in &self.shards.pollers {
            poller.join();
        }
        for writer in &self.shards.writers {
            writer.submit(WriterTask::Exit);
        }
        for writer in &self.shards.writers {
            writer.join();
        }
        info!("net stopped");
    }
}

impl LifeCycle for Net {
    /// Transitions Initial → Running.
    ///
    /// # Panics
    ///
    /// Panics when called twice or after `exit`.
    fn init(&self) {
        assert!(
            self.state
                .compare_exchange(INITIAL, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "{UNREACHED}: net already initialized"
        );
        info!(
            pollers = self.shards.pollers.len(),
            writers = self.shards.writers.len(),
            "net running"
        );
    }

    /// Transitions Running → Stopped and joins every engine thread.
    ///
    /// Each shard finishes its in-flight dispatch, releases the
    /// connections it owns, and exits its loop; nothing is interrupted
    /// mid-syscall.
    ///
    /// # Panics
    ///
    /// Panics when the engine is not running.
    fn exit(&self) {
        assert!(
            self.state
                .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "{UNREACHED}: net is not running"
        );
        self.teardown();
    }
}

impl Drop for Net {
    fn drop(&mut self) {
        // Orderly teardown if the caller never called exit().
        if self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || self
                .state
                .compare_exchange(INITIAL, STOPPED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.teardown();
        }
        INSTANCE_FLAG.store(false, Ordering::Release);
    }
}

/// The accept loop owned by the net thread.
struct NetCore {
    mux: Mux,
    listeners: IntMap<ListenerContext>,
    queue: Arc<SegQueue<NetTask>>,
    shards: Arc<Shards>,
    timeout: Duration,
}

impl NetCore {
    fn run(mut self) {
        let mut events: Vec<MuxEvent> = Vec::with_capacity(64);

        loop {
            if let Err(e) = self.mux.wait(&mut events, Some(self.timeout)) {
                panic!("net multiplexer wait failed: {e}");
            }

            for i in 0..events.len() {
                let event = events[i];
                if event.readable {
                    self.accept_all(event.socket);
                }
            }

            while let Some(task) = self.queue.pop() {
                match task {
                    NetTask::AddListener(ctx) => {
                        self.mux.register(ctx.socket, Interest::Read);
                        self.listeners.put(ctx.socket.int_value(), ctx);
                    }
                    NetTask::Exit => {
                        for ctx in self.listeners.drain() {
                            self.mux.deregister(ctx.socket);
                            sys::sys_close(ctx.socket.raw());
                        }
                        debug!("net thread stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Drains the listener's accept queue.
    fn accept_all(&mut self, listener: Socket) {
        loop {
            let Some(ctx) = self.listeners.get(listener.int_value()) else {
                return;
            };

            match sys::sys_accept(listener.raw()) {
                Ok((raw, addr)) => {
                    let socket = Socket::new(raw);
                    if let Err(e) = configure_connection(socket, &ctx.config.socket_config) {
                        warn!(%socket, error = %e, "socket option setup failed");
                        sys::sys_close(raw);
                        continue;
                    }

                    let channel = Channel::new(
                        socket,
                        (ctx.config.encoder_factory)(),
                        (ctx.config.decoder_factory)(),
                        ctx.config.handler.clone(),
                        self.shards.next_poller().clone(),
                        self.shards.next_writer().clone(),
                        Loc::from(addr),
                    );
                    let sentry = (ctx.config.sentry_factory)(&channel);
                    let node = PollerNode::new_sentry(channel.clone(), sentry);
                    channel.poller().submit(PollerTask::Register(node));
                    debug!(%socket, peer = %channel.loc(), "connection accepted");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!(%listener, error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}
