//! Signal handling for graceful shutdown and preference reload

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        Self
    }

    /// Wait for a shutdown signal
    pub async fn wait(&self) {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once per SIGHUP, the conventional "re-read your config"
/// signal. The stream is held open so signals between waits queue up
/// instead of getting lost.
pub struct ReloadSignal {
    hangup: Signal,
}

impl ReloadSignal {
    pub fn new() -> Self {
        Self {
            hangup: signal(SignalKind::hangup()).expect("failed to register SIGHUP handler"),
        }
    }

    /// Wait for the next SIGHUP
    pub async fn wait(&mut self) {
        self.hangup.recv().await;
        debug!("received SIGHUP");
    }
}

impl Default for ReloadSignal {
    fn default() -> Self {
        Self::new()
    }
}
