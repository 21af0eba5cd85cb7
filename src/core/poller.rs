use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tracing::{debug, error};

use crate::core::channel::Channel;
use crate::core::node::{NodeVerdict, PollerNode};
use crate::core::writer::WriterTask;
use crate::error::UNREACHED;
use crate::map::IntMap;
use crate::mux::{Interest, Mux, MuxEvent, MuxWaker};
use crate::net::PollerConfig;

static POLLER_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Deferred work another thread hands to a poller shard.
pub(crate) enum PollerTask {
    /// Adopt a freshly created connection.
    Register(PollerNode),
    /// Update a connection's readiness interest (requested cross-thread,
    /// typically by its writer shard).
    Ctl { channel: Channel, interest: Interest },
    /// Run the graceful-shutdown hook on the owning thread.
    ShutdownRequest { channel: Channel },
    /// Close a connection (requested cross-thread).
    Close { channel: Channel },
    /// Stop the shard after releasing every connection it owns.
    Exit,
}

struct PollerShared {
    queue: SegQueue<PollerTask>,
    waker: Arc<MuxWaker>,
    stopped: AtomicBool,
}

/// One poller shard.
///
/// The shard thread exclusively owns its multiplexer, its connection
/// registry, and a reusable scratch read region; nothing on the event path
/// takes a lock. Other threads reach the shard only through [`submit`],
/// an MPSC hand-off paired with a multiplexer wake-up.
///
/// [`submit`]: Self::submit
pub struct Poller {
    shared: Arc<PollerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Creates the shard and starts its thread (`poller-N`).
    pub(crate) fn new(config: &PollerConfig) -> Arc<Self> {
        let sequence = POLLER_SEQUENCE.fetch_add(1, Ordering::Relaxed);

        let mux = Mux::new();
        let shared = Arc::new(PollerShared {
            queue: SegQueue::new(),
            waker: mux.waker(),
            stopped: AtomicBool::new(false),
        });

        let core = PollerCore {
            mux,
            nodes: IntMap::new(config.map_size),
            scratch: vec![0u8; config.read_buffer_size],
            shared: shared.clone(),
            timeout: config.mux_timeout,
        };

        let handle = thread::Builder::new()
            .name(format!("poller-{sequence}"))
            .spawn(move || core.run())
            .expect("failed to spawn poller thread");

        Arc::new(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enqueues a task for the shard thread and interrupts its wait.
    ///
    /// Never blocks the producer.
    ///
    /// # Panics
    ///
    /// Panics when the shard has stopped: a task that would be silently
    /// dropped is a logic defect, not a condition to paper over.
    pub(crate) fn submit(&self, task: PollerTask) {
        assert!(
            !self.shared.stopped.load(Ordering::Acquire),
            "{UNREACHED}: task submitted to a stopped poller"
        );
        self.shared.queue.push(task);
        self.shared.waker.wake();
    }

    /// Waits for the shard thread to finish. Called once, after an
    /// [`PollerTask::Exit`] was submitted.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// The state owned by the shard thread itself.
struct PollerCore {
    mux: Mux,
    nodes: IntMap<PollerNode>,
    /// Reusable region protocol reads fill before decoding.
    scratch: Vec<u8>,
    shared: Arc<PollerShared>,
    timeout: Duration,
}

impl PollerCore {
    fn run(mut self) {
        let mut events: Vec<MuxEvent> = Vec::with_capacity(1024);

        loop {
            if let Err(e) = self.mux.wait(&mut events, Some(self.timeout)) {
                // Nothing but an interrupt is recoverable mid-wait, and the
                // facade already retried those.
                panic!("multiplexer wait failed: {e}");
            }

            for i in 0..events.len() {
                self.dispatch(events[i]);
            }

            while let Some(task) = self.shared.queue.pop() {
                match task {
                    PollerTask::Exit => {
                        self.shared.stopped.store(true, Ordering::Release);
                        self.cleanup();
                        return;
                    }
                    task => self.handle_task(task),
                }
            }
        }
    }

    /// Routes one readiness event to the owning node.
    ///
    /// The node is looked up again between the readable and writable halves:
    /// the first half may have promoted or closed it.
    fn dispatch(&mut self, event: MuxEvent) {
        let key = event.socket.int_value();

        if event.readable {
            if let Some(node) = self.nodes.get_mut(key) {
                let verdict = node.on_readable(self.scratch.as_mut_slice());
                self.apply(key, verdict);
            }
        }

        if event.writable {
            if let Some(node) = self.nodes.get_mut(key) {
                let verdict = node.on_writable();
                self.apply(key, verdict);
            }
        }
    }

    fn apply(&mut self, key: i32, verdict: NodeVerdict) {
        match verdict {
            NodeVerdict::Continue => {}
            NodeVerdict::Rearm(interest) => self.rearm(key, interest),
            NodeVerdict::Promote => self.promote(key),
            NodeVerdict::Close => {
                if let Some(id) = self.nodes.get(key).map(|n| n.id()) {
                    self.close_node(key, id);
                }
            }
        }
    }

    /// Updates the registered interest, but only when it actually changes.
    fn rearm(&mut self, key: i32, interest: Interest) {
        if let Some(node) = self.nodes.get_mut(key) {
            if node.interest() != interest {
                self.mux.update(node.socket(), interest);
                node.set_interest(interest);
            }
        }
    }

    /// Replaces a sentry node with its protocol form under the same key.
    ///
    /// The registry swap is what makes promotion atomic: the displaced
    /// sentry is only closed after the swap succeeded, and a second promote
    /// for the same sentry can no longer find it.
    fn promote(&mut self, key: i32) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let old_id = node.id();
        let channel = node.channel().clone();

        let Some(sentry) = node.as_sentry_mut() else {
            panic!("{UNREACHED}: promote directive on a protocol node");
        };
        let protocol = match sentry.to_protocol() {
            Ok(protocol) => protocol,
            Err(e) => {
                error!(socket = %channel.socket(), error = %e, "promotion failed");
                self.close_node(key, old_id);
                return;
            }
        };

        let new_node = PollerNode::new_protocol(channel.clone(), protocol.clone());
        let displaced = self
            .nodes
            .replace_with(key, |n| n.id() == old_id, new_node);
        match displaced {
            PollerNode::Sentry(s) => s.close_after_promotion(),
            PollerNode::Protocol(_) => panic!("{UNREACHED}: displaced a protocol node"),
        }

        self.mux.update(channel.socket(), Interest::Read);
        channel.writer().submit(WriterTask::Init {
            socket: channel.socket(),
            channel: channel.clone(),
            protocol,
        });
        channel.handler().on_connected(&channel);
        debug!(socket = %channel.socket(), loc = %channel.loc(), "connection promoted");
    }

    /// The single-owner close path.
    ///
    /// Removal of the exact `(key, node-id)` pair is the sole authorization
    /// to release resources; a concurrent close attempt loses the removal
    /// and does nothing, which makes close idempotent.
    fn close_node(&mut self, key: i32, id: u64) {
        let Some(node) = self.nodes.remove_with(key, |n| n.id() == id) else {
            return;
        };
        self.mux.deregister(node.socket());
        node.release();
    }

    fn handle_task(&mut self, task: PollerTask) {
        match task {
            PollerTask::Register(node) => {
                let socket = node.socket();
                self.mux.register(socket, node.interest());
                self.nodes.put(socket.int_value(), node);
                debug!(%socket, "connection registered");
            }
            PollerTask::Ctl { channel, interest } => {
                let key = channel.socket().int_value();
                if let Some(node) = self.nodes.get_mut(key) {
                    if node.channel() == &channel && node.interest() != interest {
                        self.mux.update(channel.socket(), interest);
                        node.set_interest(interest);
                    }
                }
            }
            PollerTask::ShutdownRequest { channel } => self.handle_shutdown(channel),
            PollerTask::Close { channel } => {
                let key = channel.socket().int_value();
                if let Some(id) = self
                    .nodes
                    .get(key)
                    .filter(|n| n.channel() == &channel)
                    .map(|n| n.id())
                {
                    self.close_node(key, id);
                }
            }
            PollerTask::Exit => unreachable!("exit is handled by the run loop"),
        }
    }

    fn handle_shutdown(&mut self, channel: Channel) {
        let key = channel.socket().int_value();
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        if node.channel() != &channel {
            return;
        }

        if node.is_protocol() {
            // The hook may emit a final message; those sends are queued on
            // the writer ahead of the shutdown task that follows them.
            channel.handler().on_shutdown(&channel);
            channel.writer().submit(WriterTask::Shutdown {
                socket: channel.socket(),
            });
        } else {
            // Shutting down a connection that never finished its handshake
            // is just a close.
            let id = node.id();
            self.close_node(key, id);
        }
    }

    /// Final drain on exit: every connection the shard still owns is
    /// released before the thread stops.
    fn cleanup(&mut self) {
        for node in self.nodes.drain() {
            self.mux.deregister(node.socket());
            node.release();
        }
        debug!("poller stopped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::buffer::{ReadBuffer, WriteBuffer};
    use crate::codec::{Decoder, Encoder, Msg};
    use crate::core::channel::Handler;
    use crate::core::node::{Directive, Protocol, Sentry};
    use crate::core::writer::Writer;
    use crate::error::Result;
    use crate::net::{Loc, Socket, WriterConfig};

    use std::sync::Arc;
    use std::sync::atomic::Ordering::SeqCst;

    struct NoopEncoder;

    impl Encoder for NoopEncoder {
        fn encode(&self, _buffer: &mut WriteBuffer, _msg: &Msg) -> Result<()> {
            Ok(())
        }
    }

    struct NoopDecoder;

    impl Decoder for NoopDecoder {
        fn decode(&self, _buffer: &mut ReadBuffer<'_>, _out: &mut Vec<Msg>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counters {
        connected: AtomicUsize,
        removed: AtomicUsize,
    }

    struct CountingHandler(Arc<Counters>);

    impl Handler for CountingHandler {
        fn on_connected(&self, _channel: &Channel) {
            self.0.connected.fetch_add(1, SeqCst);
        }

        fn on_received(&self, _channel: &Channel, _msg: Msg) {}

        fn on_shutdown(&self, _channel: &Channel) {}

        fn on_removed(&self, _channel: &Channel) {
            self.0.removed.fetch_add(1, SeqCst);
        }
    }

    struct StubProtocol {
        closed: Arc<AtomicUsize>,
    }

    impl Protocol for StubProtocol {
        fn on_readable(&self, _scratch: &mut [u8]) -> Result<Directive> {
            Ok(Directive::Ignored)
        }

        fn on_writable(&self) -> Result<Directive> {
            Ok(Directive::Ignored)
        }

        fn do_write(&self, data: &[u8]) -> Result<Directive> {
            Ok(Directive::Received(data.len()))
        }

        fn do_shutdown(&self) {}

        fn do_close(&self) {
            self.closed.fetch_add(1, SeqCst);
        }
    }

    /// A sentry whose handshake completes on its first event.
    struct StubSentry {
        closed: Arc<AtomicUsize>,
        protocol_closed: Arc<AtomicUsize>,
    }

    impl Sentry for StubSentry {
        fn on_readable(&mut self, _scratch: &mut [u8]) -> Result<Directive> {
            Ok(Directive::Promote)
        }

        fn on_writable(&mut self) -> Result<Directive> {
            Ok(Directive::Promote)
        }

        fn to_protocol(&mut self) -> Result<Arc<dyn Protocol>> {
            Ok(Arc::new(StubProtocol {
                closed: self.protocol_closed.clone(),
            }))
        }

        fn do_close(&mut self) {
            self.closed.fetch_add(1, SeqCst);
        }
    }

    fn socket_pair() -> (Socket, Socket) {
        let mut fds = [0; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair failed");
        (Socket::new(fds[0]), Socket::new(fds[1]))
    }

    fn test_core() -> PollerCore {
        let mux = Mux::new();
        let waker = mux.waker();
        PollerCore {
            mux,
            nodes: IntMap::new(16),
            scratch: vec![0u8; 1024],
            shared: Arc::new(PollerShared {
                queue: SegQueue::new(),
                waker,
                stopped: AtomicBool::new(false),
            }),
            timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_promotion_replaces_sentry_and_close_is_idempotent() {
        let counters = Arc::new(Counters::default());
        let sentry_closed = Arc::new(AtomicUsize::new(0));
        let protocol_closed = Arc::new(AtomicUsize::new(0));

        let config = crate::net::PollerConfig {
            count: 1,
            ..Default::default()
        };
        let poller = Poller::new(&config);
        let writer = Writer::new(&WriterConfig {
            count: 1,
            map_size: 16,
        });

        let (local, remote) = socket_pair();
        let channel = Channel::new(
            local,
            Box::new(NoopEncoder),
            Box::new(NoopDecoder),
            Arc::new(CountingHandler(counters.clone())),
            poller,
            writer,
            Loc::new("127.0.0.1".parse().unwrap(), 0),
        );
        let node = PollerNode::new_sentry(
            channel.clone(),
            Box::new(StubSentry {
                closed: sentry_closed.clone(),
                protocol_closed: protocol_closed.clone(),
            }),
        );
        let key = local.int_value();

        let mut core = test_core();
        core.handle_task(PollerTask::Register(node));
        assert!(core.nodes.get(key).is_some(), "node must be registered");

        // First readiness event: the handshake completes and the registry
        // entry becomes protocol-backed; the sentry closes exactly once.
        core.dispatch(MuxEvent {
            socket: local,
            readable: true,
            writable: false,
        });
        assert!(
            core.nodes.get(key).is_some_and(|n| n.is_protocol()),
            "registry must hold a protocol node after promotion"
        );
        assert_eq!(sentry_closed.load(SeqCst), 1, "sentry closed exactly once");
        assert_eq!(counters.connected.load(SeqCst), 1);

        // Further events reach the protocol node, never the retired sentry.
        core.dispatch(MuxEvent {
            socket: local,
            readable: true,
            writable: false,
        });
        assert_eq!(sentry_closed.load(SeqCst), 1);

        // Close releases resources once; a second attempt loses the
        // registry removal and does nothing.
        core.handle_task(PollerTask::Close {
            channel: channel.clone(),
        });
        assert!(core.nodes.get(key).is_none());
        assert_eq!(protocol_closed.load(SeqCst), 1, "released exactly once");
        assert_eq!(counters.removed.load(SeqCst), 1);

        core.handle_task(PollerTask::Close {
            channel: channel.clone(),
        });
        assert_eq!(protocol_closed.load(SeqCst), 1);
        assert_eq!(counters.removed.load(SeqCst), 1);

        unsafe {
            libc::close(local.raw());
            libc::close(remote.raw());
        }
    }

    #[test]
    fn test_rearm_updates_interest_only_on_change() {
        struct RearmSentry;

        impl Sentry for RearmSentry {
            fn on_readable(&mut self, _scratch: &mut [u8]) -> Result<Directive> {
                Ok(Directive::Rearm(Interest::ReadWrite))
            }

            fn on_writable(&mut self) -> Result<Directive> {
                Ok(Directive::Rearm(Interest::ReadWrite))
            }

            fn to_protocol(&mut self) -> Result<Arc<dyn Protocol>> {
                unreachable!()
            }

            fn do_close(&mut self) {}
        }

        let config = crate::net::PollerConfig {
            count: 1,
            ..Default::default()
        };
        let poller = Poller::new(&config);
        let writer = Writer::new(&WriterConfig {
            count: 1,
            map_size: 16,
        });

        let (local, remote) = socket_pair();
        let channel = Channel::new(
            local,
            Box::new(NoopEncoder),
            Box::new(NoopDecoder),
            Arc::new(CountingHandler(Arc::new(Counters::default()))),
            poller,
            writer,
            Loc::new("127.0.0.1".parse().unwrap(), 0),
        );
        let node = PollerNode::new_sentry(channel.clone(), Box::new(RearmSentry));
        let key = local.int_value();

        let mut core = test_core();
        core.handle_task(PollerTask::Register(node));
        assert_eq!(core.nodes.get(key).unwrap().interest(), Interest::Write);

        core.dispatch(MuxEvent {
            socket: local,
            readable: false,
            writable: true,
        });
        assert_eq!(core.nodes.get(key).unwrap().interest(), Interest::ReadWrite);

        unsafe {
            libc::close(local.raw());
            libc::close(remote.raw());
        }
    }
}
