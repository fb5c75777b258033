//! Service Glue: process lifecycle, service-manager readiness/watchdog
//! notifications, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use hawkbit_core::Config;
use hawkbit_http::HttpClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::poll;

/// Runs the poll loop to completion, wiring in ctrl-c/SIGTERM for
/// graceful shutdown and (when the `systemd` feature is enabled)
/// readiness and watchdog notifications.
pub async fn serve(
    config: Arc<Config>,
    client: Arc<HttpClient>,
    coordinator: Arc<Coordinator>,
    run_once: bool,
) -> bool {
    let cancel = CancellationToken::new();

    notify_ready();
    let _watchdog = spawn_watchdog(cancel.clone());

    let shutdown_cancel = cancel.clone();
    let shutdown = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        debug!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    let success = poll::run(config, client, coordinator, cancel.clone(), run_once).await;

    cancel.cancel();
    shutdown.abort();
    notify_stopping();
    success
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(feature = "systemd")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        tracing::warn!(%err, "failed to notify readiness to service manager");
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_ready() {}

#[cfg(feature = "systemd")]
fn notify_stopping() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        tracing::warn!(%err, "failed to notify stopping to service manager");
    }
}

#[cfg(not(feature = "systemd"))]
fn notify_stopping() {}

#[cfg(feature = "systemd")]
fn spawn_watchdog(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(usec) = sd_notify::watchdog_enabled(false) else {
            return;
        };
        let interval = Duration::from_micros(usec / 2);
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        tracing::warn!(%err, "watchdog kick failed");
                    }
                }
                () = cancel.cancelled() => {
                    info!("watchdog task shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(not(feature = "systemd"))]
fn spawn_watchdog(_cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {})
}
