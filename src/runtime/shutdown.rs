//! # Shutdown
//!
//! Signal handling for the HTTP and xDS servers. The watch loop stops on the
//! same signals through its controller.
//!
//! A single `watch::channel(false)` flips to `true` on SIGINT or SIGTERM;
//! each server holds a receiver and stops once it observes it.

use crate::server::ServerState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Spawn the signal handler and return the shutdown receiver.
pub fn install_signal_handler(server_state: Arc<ServerState>) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");

        server_state.set_ready(false);
        info!("Marked server as not ready, waiting for the in-flight sync to complete...");

        // Every receiver may already be gone if the loop exited on its own
        let _ = tx.send(true);
    });
    rx
}

/// Resolves once shutdown has been requested or the sender was dropped.
pub async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    // A dropped sender means nobody can request shutdown anymore; stop as well
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler, only handling SIGINT: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_requested_resolves_on_true() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(shutdown_requested(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_resolves_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), shutdown_requested(rx))
            .await
            .unwrap();
    }
}
