//! # pageant-bridge
//!
//! Local protocol bridge between legacy Pageant SSH agent clients and a
//! stream-based agent endpoint. Clients speaking the notification-based
//! shared-memory handoff, as well as clients speaking the length-prefixed
//! pipe protocol, transparently reach an agent that only exposes the pipe
//! protocol. The bridge holds no keys and performs no cryptography: it
//! forwards opaque request/response frames.
//!
//! ## Architecture
//!
//! - **Pipe frontend**: per-user socket, one worker per connection, strict
//!   per-connection request ordering.
//! - **Notification frontend**: one-shot notifications referencing a
//!   shared-memory segment; the segment owner must be a trusted identity.
//! - **Supervisor**: starts, stops and restarts both frontends as a unit
//!   and exposes aggregate health.
//!
//! Unix-only: the reference platform's native message pump and file mapping
//! are rendered as a per-user notification socket and POSIX shared memory.

pub mod agent;
pub mod config;
pub mod error;
pub mod frontend;
pub mod protocol;
pub mod security;
pub mod segment;
pub mod supervisor;
pub mod transport;

pub use agent::AgentClient;
pub use error::{BridgeError, Result};
pub use security::SecurityValidator;
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorState};
