//! Typed error handling for the hub
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`TransportError`]: a single connection failed to write or close. These
//!   never leave the connection they belong to; callers log and move on.
//! - [`ServerError`]: whole-server lifecycle failures (bind, readiness,
//!   shutdown). These are returned to the operator and never swallowed.
//!
//! Read-side failures are not errors at all from the server's point of view:
//! they end one connection and are reduced to a [`CloseKind`] purely so the
//! log line says whether the disconnect was routine.

use std::time::Duration;
use thiserror::Error;

/// Whole-server lifecycle errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// `stop()` was called on a server that is not running
    #[error("server has not been started")]
    NotStarted,

    /// `start()` was called on a server that is already running
    #[error("server is already running")]
    AlreadyStarted,

    /// The readiness probe exhausted its attempt budget
    #[error("server not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    /// The listener could not be bound
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop did not finish within the shutdown budget
    #[error("listener did not shut down within {0:?}")]
    ShutdownTimeout(Duration),

    /// The configuration is not usable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The accept loop failed with an I/O error
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The accept task ended abnormally
    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-connection outbound failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The entry has been closed; the write was not attempted
    #[error("connection is closed")]
    Closed,

    /// Writing a frame failed
    #[error("write failed: {0}")]
    Write(String),

    /// Closing the underlying socket failed
    #[error("close failed: {0}")]
    Close(String),

    /// The outbound envelope could not be encoded
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How a connection's read loop ended
///
/// Both kinds tear the connection down the same way; the distinction only
/// decides the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The peer closed normally or the network dropped underneath us
    Expected,
    /// Anything else
    Unexpected,
}

impl CloseKind {
    pub fn is_expected(self) -> bool {
        matches!(self, CloseKind::Expected)
    }
}
