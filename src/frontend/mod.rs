//! Protocol frontends and their shared health state.

mod notify;
mod pipe;

pub use notify::NotificationFrontend;
pub use pipe::PipeFrontend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Last-write-wins health flag for one frontend.
///
/// Updated after every relay attempt; read without further synchronization
/// by health reporting. Concurrent workers race benignly and staleness of at
/// most one in-flight relay is accepted.
#[derive(Debug, Clone)]
pub struct HealthFlag(Arc<AtomicBool>);

impl HealthFlag {
    /// Create a flag that starts healthy.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Record the outcome of a relay attempt.
    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Relaxed);
    }

    /// Last observed health.
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new()
    }
}
