//! Upstream agent client.
//!
//! [`AgentClient`] opens one short-lived connection to the upstream agent
//! endpoint per relay, writes the request frame in a single write, and parses
//! the reply with the fixed-shape header read from [`crate::protocol`]. The
//! dial step sits behind the [`Connect`] trait so tests can script the
//! upstream without a real socket.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::protocol::{read_agent_reply, AGENT_MAX_MESSAGE_LEN};

/// Dialer for transient upstream connections.
///
/// Implementations open a fresh stream per call; the caller owns the stream
/// and drops it when the exchange is over.
pub trait Connect: Send + Sync {
    /// The connected stream type.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Open one connection to `endpoint`.
    fn connect(
        &self,
        endpoint: &str,
    ) -> impl std::future::Future<Output = std::io::Result<Self::Stream>> + Send;
}

/// Default connector dialing a Unix domain socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixConnector;

impl Connect for UnixConnector {
    type Stream = UnixStream;

    async fn connect(&self, endpoint: &str) -> std::io::Result<UnixStream> {
        UnixStream::connect(endpoint).await
    }
}

/// Client for one-shot request/reply exchanges with the upstream agent.
///
/// Stateless apart from its connector; cheap to clone into connection
/// workers. No pooling: each relay opens and closes its own connection.
#[derive(Debug, Clone)]
pub struct AgentClient<C = UnixConnector> {
    connector: C,
}

impl AgentClient<UnixConnector> {
    /// Create a client using the default Unix socket connector.
    pub fn new() -> Self {
        Self::with_connector(UnixConnector)
    }
}

impl Default for AgentClient<UnixConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connect> AgentClient<C> {
    /// Create a client with a custom connector.
    pub fn with_connector(connector: C) -> Self {
        Self { connector }
    }

    /// Relay one request frame to the agent at `endpoint` and return the
    /// reply bytes verbatim.
    ///
    /// Oversized frames are rejected before any connection is attempted.
    /// The connection is closed on every exit path, success or failure.
    pub async fn relay(&self, frame: &[u8], endpoint: &str) -> Result<Vec<u8>> {
        if frame.len() > AGENT_MAX_MESSAGE_LEN {
            return Err(BridgeError::MessageTooLong(frame.len()));
        }

        let mut stream =
            self.connector
                .connect(endpoint)
                .await
                .map_err(|source| BridgeError::ConnectFailed {
                    endpoint: endpoint.to_string(),
                    source,
                })?;

        stream
            .write_all(frame)
            .await
            .map_err(|source| BridgeError::WriteFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let reply = read_agent_reply(&mut stream)
            .await
            .map_err(|source| BridgeError::ReadFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        debug!(request = frame.len(), reply = reply.len(), "agent exchange complete");
        Ok(reply)
    }
}
