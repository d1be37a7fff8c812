//! Length-prefixed frame reads and the fixed-shape agent reply parse.
//!
//! Frame layout on both client-facing transports and towards the upstream
//! agent:
//!
//! ```text
//! ┌──────────────┬──────────────────┐
//! │ Length       │ Payload          │
//! │ 4 bytes BE   │ `length` bytes   │
//! └──────────────┴──────────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BridgeError, Result};

/// Maximum total frame size in the agent protocol (2^14 - 1 bytes).
pub const AGENT_MAX_MESSAGE_LEN: usize = (1 << 14) - 1;

/// Size of the length prefix (fixed, exactly 4).
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Size of the fixed reply header read from the upstream agent:
/// 4-byte length field, 1-byte reply kind, 4-byte count field.
pub const REPLY_HEADER_LEN: usize = 9;

/// Read one complete request frame (length prefix plus payload).
///
/// Returns `Ok(None)` when the peer closed the connection cleanly at a frame
/// boundary. A close in the middle of a frame, or any other I/O failure, is
/// an error. Frames whose total size would exceed
/// [`AGENT_MAX_MESSAGE_LEN`] are rejected before their payload is read.
pub async fn read_request_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BridgeError::Io(e)),
    }

    let payload_len = u32::from_be_bytes(prefix) as usize;
    let total = payload_len + LENGTH_PREFIX_LEN;
    if total > AGENT_MAX_MESSAGE_LEN {
        return Err(BridgeError::MessageTooLong(total));
    }

    let mut frame = vec![0u8; total];
    frame[..LENGTH_PREFIX_LEN].copy_from_slice(&prefix);
    reader.read_exact(&mut frame[LENGTH_PREFIX_LEN..]).await?;

    Ok(Some(frame))
}

/// Read one upstream agent reply with the fixed-shape header parse.
///
/// The reply is read as 4 bytes (length field), 1 byte (reply kind), and
/// 4 bytes interpreted as a big-endian count. A zero count means the payload
/// is empty and nothing further is read; a nonzero count triggers a single
/// read of up to `AGENT_MAX_MESSAGE_LEN - 9` payload bytes. The returned
/// buffer is the verbatim concatenation of all four segments.
///
/// This parse is fixed-shape by construction and mirrors the identity-list
/// reply of the agent protocol; it is applied to every reply kind, so for
/// other kinds the count field is unrelated data driving the payload read.
pub async fn read_agent_reply<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut reply = Vec::with_capacity(REPLY_HEADER_LEN);

    let mut length = [0u8; 4];
    reader.read_exact(&mut length).await?;
    reply.extend_from_slice(&length);

    let mut kind = [0u8; 1];
    reader.read_exact(&mut kind).await?;
    reply.extend_from_slice(&kind);

    let mut count = [0u8; 4];
    reader.read_exact(&mut count).await?;
    reply.extend_from_slice(&count);

    if u32::from_be_bytes(count) > 0 {
        let mut payload = vec![0u8; AGENT_MAX_MESSAGE_LEN - REPLY_HEADER_LEN];
        let n = reader.read(&mut payload).await?;
        reply.extend_from_slice(&payload[..n]);
    }

    Ok(reply)
}
