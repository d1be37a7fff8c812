//! Transport module - endpoint naming, pipe listener, notification socket.

mod notify;
mod pipe;

pub use notify::{notify, Notification, NotificationEndpoint, StatusReply};
pub use pipe::{
    agent_pipe_path, current_username, notify_socket_path, obfuscated_tag, PipeListener,
    PROTOCOL_CLASS_NAME,
};
