//! Legacy notification transport.
//!
//! The reference platform delivers Pageant notifications to a hidden native
//! endpoint as one-shot messages with a synchronous status result. The Unix
//! rendition keeps those semantics on a per-user socket: one notification
//! per connection, sender half-closes after writing, receiver replies a
//! single status byte (1 success, 0 failure) and closes.
//!
//! Message layout: `[1-byte kind][segment name bytes]`. Only data-copy
//! notifications carry a segment name.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

const KIND_TERMINATE: u8 = 0;
const KIND_RESTART_REQUEST: u8 = 1;
const KIND_DATA_COPY: u8 = 2;

/// The three notification kinds the endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Stop the message loop.
    Terminate,
    /// Ask the supervisor to restart both frontends.
    RestartRequest,
    /// A request frame awaits in the named shared-memory segment.
    DataCopy {
        /// Name of the pre-allocated segment holding the frame.
        segment: String,
    },
}

impl Notification {
    fn encode(&self) -> Vec<u8> {
        match self {
            Notification::Terminate => vec![KIND_TERMINATE],
            Notification::RestartRequest => vec![KIND_RESTART_REQUEST],
            Notification::DataCopy { segment } => {
                let mut bytes = Vec::with_capacity(1 + segment.len());
                bytes.push(KIND_DATA_COPY);
                bytes.extend_from_slice(segment.as_bytes());
                bytes
            }
        }
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.split_first()? {
            (&KIND_TERMINATE, []) => Some(Notification::Terminate),
            (&KIND_RESTART_REQUEST, []) => Some(Notification::RestartRequest),
            (&KIND_DATA_COPY, name) if !name.is_empty() => {
                let segment = std::str::from_utf8(name).ok()?.to_string();
                Some(Notification::DataCopy { segment })
            }
            _ => None,
        }
    }
}

/// Receiving side of the notification transport.
pub struct NotificationEndpoint {
    listener: UnixListener,
    path: String,
}

impl NotificationEndpoint {
    /// Register the endpoint at `path`, removing any stale socket file.
    pub fn bind(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    /// Await the next notification.
    ///
    /// Malformed messages are an error for this one exchange; the caller's
    /// loop keeps serving. The returned [`StatusReply`] must be used to
    /// complete the sender's synchronous round-trip.
    pub async fn next(&self) -> Result<(Notification, StatusReply)> {
        let (mut stream, _addr) = self.listener.accept().await?;

        let mut bytes = Vec::with_capacity(64);
        stream.read_to_end(&mut bytes).await?;

        let notification = Notification::decode(&bytes).ok_or_else(|| {
            crate::error::BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "malformed notification message",
            ))
        })?;

        Ok((notification, StatusReply { stream }))
    }

    /// Path the endpoint is registered at.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for NotificationEndpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One-shot status result back to the notifier.
pub struct StatusReply {
    stream: UnixStream,
}

impl StatusReply {
    /// Send the status byte and close the connection.
    pub async fn send(mut self, ok: bool) {
        // The notifier may already be gone; its absence is its own problem.
        let _ = self.stream.write_all(&[u8::from(ok)]).await;
    }
}

/// Deliver one notification to the endpoint at `path` and await its status.
///
/// Returns true iff the receiver reported success.
pub async fn notify(path: &str, notification: &Notification) -> std::io::Result<bool> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(&notification.encode()).await?;
    stream.shutdown().await?;

    let mut status = [0u8; 1];
    let n = stream.read(&mut status).await?;
    Ok(n == 1 && status[0] == 1)
}
