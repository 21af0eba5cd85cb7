//! # Tessera
//!
//! **Tessera** is a reactor-style network I/O engine. A small set of
//! long-lived worker threads multiplexes many TCP connections over the
//! platform's native readiness facility, drives a two-phase connection
//! lifecycle, and moves bytes through growable, policy-driven buffers.
//!
//! It exposes no futures and spawns no tasks: applications plug into the
//! engine through four narrow contracts and keep direct control over the
//! event loops.
//!
//! - A **[`Sentry`]** guards the pre-protocol phase (handshake,
//!   authentication) and asks for *promotion* when it completes.
//! - A **[`Protocol`]** carries the established connection's traffic.
//! - A **[`Decoder`]**/**[`Encoder`]** pair translates between bytes and
//!   application messages.
//! - A **[`Handler`]** receives the connection's lifecycle callbacks, all
//!   serialized on the connection's owning poller thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────┐   listeners    ┌────────────┐  readiness  ┌──────────────┐
//! │  Net  │───────────────▶│ Poller × N │────────────▶│ Sentry/Proto │
//! └───────┘   (accept)     └────────────┘   events    │    nodes     │
//!     │                          ▲                    └──────────────┘
//!     │ lifecycle                │ interest ctl               │ decoded
//!     ▼                          │                            ▼ msgs
//! ┌────────────┐   deferred writes                      ┌─────────┐
//! │ Writer × N │◀───────────────────── any thread ──────│ Handler │
//! └────────────┘                                        └─────────┘
//! ```
//!
//! Each poller shard owns its multiplexer and its connection registry
//! outright; cross-thread interaction happens only through task queues, so
//! the event path takes no locks.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tessera::{LifeCycle, ListenerConfig, Loc, Net, NetConfig, PollerConfig, WriterConfig};
//!
//! let net = Net::new(
//!     NetConfig::default(),
//!     PollerConfig::default(),
//!     WriterConfig::default(),
//! );
//! net.init();
//! net.add_listener(ListenerConfig::new(
//!     Loc::new("127.0.0.1".parse().unwrap(), 9000),
//!     Box::new(|| Box::new(MyEncoder)),
//!     Box::new(|| Box::new(MyDecoder)),
//!     Arc::new(MyHandler),
//! ))?;
//! // ... run until shutdown ...
//! net.exit();
//! ```

pub mod buffer;
pub mod codec;
pub mod core;
pub mod map;
pub mod mux;
pub mod net;

mod error;

pub use crate::codec::{Decoder, Encoder, Msg};
pub use crate::core::{Channel, Directive, Handler, LifeCycle, Protocol, Sentry};
pub use crate::error::{FrameworkError, Result};
pub use crate::mux::Interest;
pub use crate::net::{
    ListenerConfig, Loc, Net, NetConfig, PollerConfig, Socket, SocketConfig, WriterConfig,
};
