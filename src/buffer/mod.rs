//! Byte-buffer subsystem.
//!
//! This module provides the memory primitives the engine moves bytes
//! through:
//! - [`WriteBuffer`]: an append-only region behind one of four growth
//!   policies (heap-growing, arena-growing, fixed, reserved),
//! - [`ReadBuffer`]: a bounds-checked read cursor over a borrowed region,
//! - [`Arena`]: a confined allocation context released in bulk.
//!
//! Buffers are independent of where their backing region lives; the growth
//! policy decides how a region is enlarged and who releases it.

mod arena;
mod read;
mod write;

pub use arena::Arena;
pub use read::ReadBuffer;
pub use write::WriteBuffer;

/// C-style string terminator.
pub const NUT: u8 = b'\0';

pub(crate) const BYTE_SIZE: usize = 1;
pub(crate) const SHORT_SIZE: usize = size_of::<i16>();
pub(crate) const INT_SIZE: usize = size_of::<i32>();
pub(crate) const LONG_SIZE: usize = size_of::<i64>();
