use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error};

use crate::buffer::WriteBuffer;
use crate::core::channel::Channel;
use crate::core::node::{Directive, Protocol};
use crate::core::poller::PollerTask;
use crate::error::UNREACHED;
use crate::map::IntMap;
use crate::mux::Interest;
use crate::net::{Socket, WriterConfig};

static WRITER_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// Deferred write work handed to a writer shard.
pub(crate) enum WriterTask {
    /// Bind a freshly promoted connection to this shard.
    Init {
        socket: Socket,
        channel: Channel,
        protocol: Arc<dyn Protocol>,
    },
    /// Encoded outbound bytes from any thread.
    Data { socket: Socket, buffer: WriteBuffer },
    /// The owning poller observed a writable event; flush pending bytes.
    Writable { socket: Socket },
    /// Graceful shutdown: close the outbound half once pending bytes drain.
    Shutdown { socket: Socket },
    /// The connection closed; drop this shard's state for it.
    Close { socket: Socket },
    /// Stop the shard.
    Exit,
}

/// One writer shard.
///
/// Decouples buffer appends (any thread) from socket write calls (this
/// shard's thread only). A connection is bound to exactly one writer shard
/// for its lifetime, so all writes for a given socket are serialized without
/// a per-socket lock.
pub struct Writer {
    sender: Sender<WriterTask>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Writer {
    /// Creates the shard and starts its thread (`writer-N`).
    pub(crate) fn new(config: &WriterConfig) -> Arc<Self> {
        let sequence = WRITER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded();

        let core = WriterCore {
            nodes: IntMap::new(config.map_size),
            receiver,
        };

        let handle = thread::Builder::new()
            .name(format!("writer-{sequence}"))
            .spawn(move || core.run())
            .expect("failed to spawn writer thread");

        Arc::new(Self {
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enqueues a task for the shard thread. Never blocks the producer.
    ///
    /// # Panics
    ///
    /// Panics when the shard has stopped; see [`Poller::submit`]. A
    /// silently dropped write is a logic defect.
    ///
    /// [`Poller::submit`]: crate::core::poller::Poller::submit
    pub(crate) fn submit(&self, task: WriterTask) {
        self.sender
            .send(task)
            .unwrap_or_else(|_| panic!("{UNREACHED}: task submitted to a stopped writer"));
    }

    /// Waits for the shard thread to finish. Called once, after a
    /// [`WriterTask::Exit`] was submitted.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Per-connection write state owned by the shard thread.
struct WriterNode {
    channel: Channel,
    protocol: Arc<dyn Protocol>,
    /// Bytes the socket would not accept yet, in submission order.
    pending: Option<WriteBuffer>,
    /// A graceful shutdown waits for `pending` to drain.
    shutting: bool,
}

struct WriterCore {
    nodes: IntMap<WriterNode>,
    receiver: Receiver<WriterTask>,
}

impl WriterCore {
    fn run(mut self) {
        // Blocking receive: the shard sleeps until work arrives.
        while let Ok(task) = self.receiver.recv() {
            match task {
                WriterTask::Init {
                    socket,
                    channel,
                    protocol,
                } => {
                    self.nodes.put(
                        socket.int_value(),
                        WriterNode {
                            channel,
                            protocol,
                            pending: None,
                            shutting: false,
                        },
                    );
                }
                WriterTask::Data { socket, buffer } => self.handle_data(socket, buffer),
                WriterTask::Writable { socket } => self.handle_writable(socket),
                WriterTask::Shutdown { socket } => self.handle_shutdown(socket),
                WriterTask::Close { socket } => {
                    self.nodes.remove_with(socket.int_value(), |_| true);
                }
                WriterTask::Exit => break,
            }
        }
        debug!("writer stopped");
    }

    fn handle_data(&mut self, socket: Socket, buffer: WriteBuffer) {
        let Some(node) = self.nodes.get_mut(socket.int_value()) else {
            // The connection closed between the send and this task.
            return;
        };

        if let Some(pending) = node.pending.as_mut() {
            // Earlier bytes are still queued; order is preserved by
            // appending behind them.
            pending.write_bytes(buffer.content());
            return;
        }

        match node.protocol.do_write(buffer.content()) {
            Err(e) => {
                error!(%socket, error = %e, "write failed");
                let channel = node.channel.clone();
                channel.poller().submit(PollerTask::Close { channel: channel.clone() });
            }
            Ok(Directive::Received(n)) if n >= buffer.write_index() => {}
            Ok(Directive::Received(n)) => {
                Self::stall(node, buffer.truncate(n));
            }
            Ok(Directive::Rearm(Interest::Write | Interest::ReadWrite)) => {
                Self::stall(node, buffer);
            }
            Ok(Directive::Ignored) => {}
            Ok(other) => panic!("{UNREACHED}: write directive {:?}", other),
        }
    }

    /// Parks unwritten bytes and asks the owning poller to watch for
    /// writability alongside reads.
    fn stall(node: &mut WriterNode, remainder: WriteBuffer) {
        node.pending = Some(remainder);
        let channel = node.channel.clone();
        channel.poller().submit(PollerTask::Ctl {
            channel: channel.clone(),
            interest: Interest::ReadWrite,
        });
    }

    fn handle_writable(&mut self, socket: Socket) {
        let Some(node) = self.nodes.get_mut(socket.int_value()) else {
            return;
        };

        if let Some(pending) = node.pending.take() {
            match node.protocol.do_write(pending.content()) {
                Err(e) => {
                    error!(%socket, error = %e, "pending flush failed");
                    let channel = node.channel.clone();
                    channel.poller().submit(PollerTask::Close { channel: channel.clone() });
                    return;
                }
                Ok(Directive::Received(n)) if n >= pending.write_index() => {}
                Ok(Directive::Received(n)) => {
                    // Still blocked; keep the remainder and stay write-armed.
                    node.pending = Some(pending.truncate(n));
                    return;
                }
                Ok(Directive::Rearm(Interest::Write | Interest::ReadWrite))
                | Ok(Directive::Ignored) => {
                    node.pending = Some(pending);
                    return;
                }
                Ok(other) => panic!("{UNREACHED}: write directive {:?}", other),
            }
        }

        // Drained: complete a deferred shutdown and drop the write interest.
        if node.shutting {
            node.shutting = false;
            node.protocol.do_shutdown();
        }
        let channel = node.channel.clone();
        channel.poller().submit(PollerTask::Ctl {
            channel: channel.clone(),
            interest: Interest::Read,
        });
    }

    fn handle_shutdown(&mut self, socket: Socket) {
        let Some(node) = self.nodes.get_mut(socket.int_value()) else {
            return;
        };
        if node.pending.is_some() {
            node.shutting = true;
        } else {
            node.protocol.do_shutdown();
        }
    }
}
