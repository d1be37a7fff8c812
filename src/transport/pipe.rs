//! Client-facing pipe endpoint.
//!
//! The bridge listens on a per-user Unix domain socket whose name follows
//! the Pageant convention: `pageant.{username}.{tag}`, where `tag` is a
//! stable obfuscated identifier derived from the protocol class name. Stale
//! socket files are removed before binding and on listener drop.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

/// Class name of the legacy notification receiver; also the fixed
/// identifying string the pipe-name tag is derived from.
pub const PROTOCOL_CLASS_NAME: &str = "Pageant";

/// Block size of the memory-protection transform the reference platform
/// applies to the identifying string before hashing.
const OBFUSCATION_BLOCK_SIZE: usize = 16;

/// Derive the stable obfuscated tag used in the pipe name.
///
/// The identifying string is zero-padded to the memory-protection block size
/// and SHA-256 hashed. The reference platform additionally runs the padded
/// buffer through an opaque keyed in-memory transform; the tag only needs to
/// be opaque and stable per installation, so off that platform the transform
/// is the identity.
pub fn obfuscated_tag(name: &str) -> String {
    let mut padded = name.as_bytes().to_vec();
    padded.push(0);
    let blocks = padded.len().div_ceil(OBFUSCATION_BLOCK_SIZE);
    padded.resize(blocks * OBFUSCATION_BLOCK_SIZE, 0);

    let mut hasher = Sha256::new();
    hasher.update(&padded);
    format!("{:x}", hasher.finalize())
}

/// Path of the client-facing pipe endpoint for `username`.
pub fn agent_pipe_path(username: &str, tag: &str) -> String {
    format!("/tmp/pageant.{username}.{tag}.sock")
}

/// Path of the notification endpoint for `username`.
pub fn notify_socket_path(username: &str) -> String {
    format!("/tmp/pageant.{username}.msg.sock")
}

/// Name of the user the process runs as.
pub fn current_username() -> String {
    nix::unistd::User::from_uid(nix::unistd::Uid::current())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Listener on the client-facing pipe endpoint.
pub struct PipeListener {
    listener: UnixListener,
    path: String,
}

impl PipeListener {
    /// Bind to a socket path.
    ///
    /// Removes any stale socket file at the path before binding.
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

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Get the socket path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
