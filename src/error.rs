//! Framework error taxonomy.
//!
//! Errors fall into three layers, mirroring where they originate:
//! - [`FrameworkError::Context`]: generic misuse of framework state,
//! - [`FrameworkError::Native`]: a native call returned a POSIX-style
//!   error code,
//! - [`FrameworkError::Network`]: a failure while the engine was driving
//!   a connection.
//!
//! Contract violations (out-of-range indices, unreachable directive values,
//! double initialization) are *not* represented here: they indicate logic
//! defects and panic at the call site instead of being propagated.

use std::io;

use thiserror::Error;

/// Message used when a branch that must never execute is reached.
pub(crate) const UNREACHED: &str = "shouldn't be reached";

#[derive(Debug, Error)]
pub enum FrameworkError {
    /// Generic misuse of framework context or state.
    #[error("context error: {0}")]
    Context(&'static str),

    /// A native call failed. Carries the failing operation and the OS error.
    #[error("native call `{op}` failed: {source}")]
    Native {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A failure while processing network traffic.
    #[error("network error: {0}")]
    Network(String),
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, FrameworkError>;
