//! Engine core: shard threads and the connection-state machine.
//!
//! One thread per poller shard drives readiness events; one thread per
//! writer shard drives deferred socket writes; a connection lives in
//! exactly one of each. The state machine has two phases, [`Sentry`]
//! until the handshake completes and [`Protocol`] after it, and a connection
//! moves between them through an atomic registry swap on its owning
//! poller.
//!
//! Cross-shard interaction happens only through task-queue messages; no
//! shard ever mutates another shard's state directly.

mod channel;
mod node;
mod poller;
mod writer;

pub(crate) mod state;

pub use channel::{Channel, Handler};
pub use node::{Directive, NET_IGNORED, NET_R, NET_RW, NET_UPDATE, NET_W, Protocol, Sentry};
pub use poller::Poller;
pub use state::{INITIAL, LifeCycle, RUNNING, STOPPED, State};
pub use writer::Writer;

pub(crate) use node::PollerNode;
pub(crate) use poller::PollerTask;
pub(crate) use writer::WriterTask;
