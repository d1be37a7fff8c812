//! Wire framing for the agent protocol.
//!
//! Both transports speak the same outer format: every frame begins with a
//! 4-byte big-endian length field describing the bytes that follow. Replies
//! from the upstream agent are parsed with a fixed-shape header read, see
//! [`read_agent_reply`].

mod framing;

pub use framing::{
    read_agent_reply, read_request_frame, AGENT_MAX_MESSAGE_LEN, LENGTH_PREFIX_LEN,
    REPLY_HEADER_LEN,
};
