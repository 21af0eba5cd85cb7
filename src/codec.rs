//! Encoder/decoder contracts.
//!
//! The engine moves opaque messages; the concrete wire format belongs to
//! the protocol layer plugged in through these two traits. Implementations
//! are bound per connection by the listener's (or dial's) factories and are
//! only ever invoked from the threads owning that connection, so they may
//! keep no interior locking.

use std::any::Any;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::Result;

/// A decoded application message.
///
/// Handlers downcast to their concrete message type.
pub type Msg = Box<dyn Any + Send>;

/// Extracts messages from buffered inbound bytes.
pub trait Decoder: Send + Sync {
    /// Appends zero or more decoded messages to `out`.
    ///
    /// Appending nothing signals that the buffered bytes do not yet form a
    /// complete message: the engine retains everything after the read
    /// cursor and retries once more bytes arrive. It is *not* an error.
    ///
    /// An `Err` closes the connection.
    fn decode(&self, buffer: &mut ReadBuffer<'_>, out: &mut Vec<Msg>) -> Result<()>;
}

/// Serializes one message into outbound bytes.
pub trait Encoder: Send + Sync {
    /// Writes `msg` into `buffer` in the surrounding protocol's wire format.
    fn encode(&self, buffer: &mut WriteBuffer, msg: &Msg) -> Result<()>;
}
