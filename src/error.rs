//! Error taxonomy for the stratum client.
//!
//! A single failure on the connection (decode error, read error, server
//! hang-up) has to reach every pending call and every subscription, so the
//! error type is `Clone` and keeps I/O errors behind an `Arc`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Convenience alias used across the stratum and electrum modules.
pub type Result<T, E = StratumError> = std::result::Result<T, E>;

/// Everything that can go wrong talking to an Electrum server.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StratumError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// `host:port` that was dialled.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading from the socket failed while the client was not closing.
    #[error("transport read failed: {0}")]
    Read(#[source] Arc<io::Error>),

    /// Writing a request line failed. Only the caller that wrote sees this.
    #[error("transport write failed: {0}")]
    Write(#[source] Arc<io::Error>),

    /// A line from the server was not a valid frame.
    #[error("malformed frame ({reason}): {line}")]
    Decode {
        /// The offending line, truncated for display.
        line: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The server ended the stream while the client was still in use.
    #[error("server closed the connection")]
    Disconnected,

    /// The client was closed, or closed while the caller was waiting.
    #[error("connection is closed")]
    Closed,

    /// A waiter for this correlation id is already registered.
    #[error("call {id} already has a waiter")]
    AlreadyAwaited {
        /// Correlation id that was awaited twice.
        id: u64,
    },

    /// An opt-in call timeout elapsed before the server answered.
    #[error("call {id} ({method}) got no response within {after:?}")]
    Timeout {
        /// Correlation id of the abandoned call.
        id: u64,
        /// Method that was called.
        method: String,
        /// Configured timeout.
        after: Duration,
    },

    /// The server answered with an `error` object instead of a result.
    #[error("server rejected call {id}: {error}")]
    Server {
        /// Correlation id of the rejected call.
        id: u64,
        /// Error payload exactly as the server sent it.
        error: serde_json::Value,
    },

    /// A result arrived but did not have the expected shape.
    #[error("unexpected result for {method}: {reason}")]
    UnexpectedResult {
        /// Method whose result was being mapped.
        method: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl StratumError {
    /// Whether this error ends the connection for everyone.
    ///
    /// Fatal errors are delivered to every pending call and subscription;
    /// a new client has to be built to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Read(_) | Self::Decode { .. } | Self::Disconnected | Self::Closed
        )
    }

    pub(crate) fn decode(line: &str, reason: impl Into<String>) -> Self {
        /// Keep log lines and error messages readable.
        const MAX_LINE_IN_ERROR: usize = 200;

        let line = match line.char_indices().nth(MAX_LINE_IN_ERROR) {
            Some((cut, _)) => format!("{}...", &line[..cut]),
            None => line.to_string(),
        };
        Self::Decode {
            line,
            reason: reason.into(),
        }
    }
}
