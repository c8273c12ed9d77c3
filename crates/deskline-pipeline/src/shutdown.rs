// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SIGINT/SIGTERM handling.
//!
//! Both signals cancel one [`CancellationToken`]. Queue passes check it
//! between messages, so an in-flight send always completes.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn a task that cancels the returned token on SIGINT or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        cancel.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT (Ctrl+C), shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => {
            // Without any signal source the process only stops when killed.
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

/// Await `task`, giving up after `grace` once shutdown has begun.
///
/// Returns `None` when the grace period elapsed first.
pub async fn drain<F: Future>(task: F, grace: Duration) -> Option<F::Output> {
    match tokio::time::timeout(grace, task).await {
        Ok(output) => Some(output),
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed, abandoning task");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_finished_output() {
        assert_eq!(drain(async { 7 }, Duration::from_secs(1)).await, Some(7));
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert_eq!(drain(slow, Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn handler_token_starts_uncancelled() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
