//! Coordinated shutdown.
//!
//! One [`ShutdownController`] per process hands out child cancellation
//! tokens to every long-running task. Triggering shutdown cancels the
//! whole tree; the caller then awaits task handles in whatever order
//! the pipeline requires (client-facing first, producers last).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hands out cancellation tokens and triggers shutdown exactly once.
#[derive(Clone)]
pub struct ShutdownController {
    root: CancellationToken,
    triggered: Arc<AtomicBool>,
}

impl ShutdownController {
    /// Fresh controller in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Child token for one component. Cancelled when shutdown triggers.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Whether shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Cancel every token handed out. Safe to call more than once;
    /// only the first call does anything.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already triggered");
            return;
        }
        info!("Shutdown triggered, cancelling all components");
        self.root.cancel();
    }

    /// Resolves when shutdown has been triggered.
    pub async fn triggered(&self) {
        self.root.cancelled().await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
