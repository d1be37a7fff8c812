//! Error types for pageant-bridge.

use nix::errno::Errno;
use thiserror::Error;

/// Main error type for all bridge operations.
///
/// Every variant is local to the single request, connection or notification
/// that produced it: it ends that one exchange and flips the owning
/// frontend's health flag, but never terminates an accept or message loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Request frame exceeds the agent protocol's maximum message length.
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    /// Could not open a transient connection to the upstream agent.
    #[error("cannot connect to agent endpoint {endpoint}")]
    ConnectFailed {
        /// The endpoint that was dialed.
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the request frame to the upstream agent failed.
    #[error("cannot write to agent endpoint {endpoint}")]
    WriteFailed {
        /// The endpoint the frame was written to.
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// One of the mandatory reply reads from the upstream agent failed.
    #[error("cannot read reply from agent endpoint {endpoint}")]
    ReadFailed {
        /// The endpoint the reply was read from.
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The shared-memory segment is owned by an untrusted identity.
    #[error("shared-memory segment owner is not trusted")]
    Untrusted,

    /// The shared-memory segment could not be opened.
    #[error("cannot open shared-memory segment")]
    HandleOpenFailed(#[source] Errno),

    /// Mapping the segment failed, or the mapped view is smaller than the
    /// access the frame requires.
    #[error("cannot map shared-memory segment: {0}")]
    MappingFailed(String),

    /// I/O error outside the relay path (bind, accept, notification socket).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration load/store failure.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
