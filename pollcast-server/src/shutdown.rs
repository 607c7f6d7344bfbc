//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use crate::handlers;
use crate::state::AppState;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C). Fails if the handlers cannot
/// be installed.
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// Only `[poll]` and `[[handlers]]` are applied; `[server]` and `[source]`
/// need a restart. Returns a Notify that stops the task.
pub fn spawn_config_reload_handler(
    state: AppState,
    config_loader: Arc<ConfigLoader>,
    http: reqwest::Client,
) -> std::io::Result<Arc<Notify>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded_config) => {
                            if let Err(e) =
                                handlers::apply(&state.client, &loaded_config.handlers, &http).await
                            {
                                tracing::error!("Failed to reload handlers: {}", e);
                                continue;
                            }
                            state.client.config().update(loaded_config.poll).await;
                            tracing::info!("Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    Ok(shutdown_notify)
}
