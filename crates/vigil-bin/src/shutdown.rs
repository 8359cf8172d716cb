// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! OS signals (SIGTERM, SIGINT, SIGQUIT on Unix; Ctrl+C on Windows) cancel
//! the run's [`TestRunCancellationToken`]. The host then tears the session
//! down normally, so one signal is enough.

use std::io;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use vigil_core::TestRunCancellationToken;

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Turns OS signals into cancellation of a run token.
///
/// # Example
///
/// ```ignore
/// use vigil_bin::shutdown::ShutdownCoordinator;
///
/// let coordinator = ShutdownCoordinator::new();
/// let listener = coordinator.spawn_signal_listener();
///
/// host.run(coordinator.token()).await;
/// listener.abort();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: TestRunCancellationToken,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a coordinator that cancels `token`.
    pub fn with_token(token: TestRunCancellationToken) -> Self {
        Self { token }
    }

    /// Returns the token that signals cancel.
    pub fn token(&self) -> TestRunCancellationToken {
        self.token.clone()
    }

    /// Initiates shutdown. Idempotent.
    pub fn initiate_shutdown(&self) {
        if !self.token.is_cancellation_requested() {
            info!("Shutdown initiated");
        }
        self.token.cancel();
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancellation_requested()
    }

    /// Waits until a signal arrives or the token is cancelled by other means,
    /// then cancels the token.
    pub async fn wait_for_shutdown(&self) {
        tokio::select! {
            result = wait_for_signal() => {
                if let Err(e) = result {
                    warn!(error = %e, "Signal handling unavailable");
                    self.token.cancelled().await;
                    return;
                }
                self.initiate_shutdown();
            }
            _ = self.token.cancelled() => {}
        }
    }

    /// Runs [`wait_for_shutdown`](Self::wait_for_shutdown) in the background.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.wait_for_shutdown().await })
    }
}

/// Resolves on the first termination signal.
async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigquit.recv() => info!("Received SIGQUIT"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
