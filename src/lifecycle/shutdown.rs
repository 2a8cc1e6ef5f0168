//! Shutdown coordination for the daemon.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Hands out cancellation tokens that all long-running watches observe.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    root: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for one watch. Cancelling it stops only that watch; triggering
    /// shutdown cancels all of them.
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Trigger the shutdown signal. Safe to call repeatedly.
    pub fn trigger(&self) {
        self.root.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wait until shutdown is triggered.
    pub async fn triggered(&self) {
        self.root.cancelled().await
    }
}
