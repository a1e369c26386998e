//! Liveness/readiness reporting.
//!
//! A connector embedded as a library has no business opening listening
//! sockets of its own, so health is exposed as plain async accessor methods
//! rather than a bound TCP socket - the host process wires these into
//! whatever health surface it already serves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared liveness/readiness state, updated by the chain tracker once it has
/// completed its first reconcile pass.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self { ready: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Always true once the process is running - there is no deeper
    /// dependency that can make a live process report as dead.
    pub async fn is_live(&self) -> bool {
        true
    }

    /// True once the chain tracker has synced at least one block.
    pub async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_unready_and_becomes_ready() {
        let health = HealthState::new();
        assert!(health.is_live().await);
        assert!(!health.is_ready().await);
        health.set_ready(true);
        assert!(health.is_ready().await);
    }
}
