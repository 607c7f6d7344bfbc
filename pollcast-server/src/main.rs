//! pollcast server
//!
//! Polls a JSON collection endpoint and relays each new record, at most
//! once, to the configured handlers.

mod config;
mod handlers;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::ConfigLoader;
use pollcast_core::PollClient;
use pollcast_core::processors::{BearerToken, HttpFetcher};
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// pollcast - relay new records from a polled API to handlers
#[derive(Parser, Debug)]
#[command(name = "pollcast-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./pollcast.toml")]
    config: PathBuf,

    /// Override the status API listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting pollcast-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    // Build the fetcher and the client
    let source = &loaded_config.source;
    let fetcher = source.params.iter().fold(
        HttpFetcher::new(source.endpoint.clone(), BearerToken::new(source.token.clone()))
            .with_http_client(http.clone())
            .with_method(source.method)
            .with_id_field(source.id_field.as_str()),
        |fetcher, (key, value)| fetcher.with_param(key.as_str(), value.as_str()),
    );
    let client = PollClient::new(fetcher, loaded_config.poll.clone());
    handlers::apply(&client, &loaded_config.handlers, &http).await?;

    // Create application state
    let state = AppState::new(client.clone());
    let status_task = state.status.spawn(client.subscribe());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Run the poll loop; any exit, fatal or not, shuts the server down.
    let poll_task = tokio::spawn({
        let client = client.clone();
        let shutdown_tx = shutdown_tx.clone();
        async move {
            let result = client.start().await;
            shutdown_tx.send_replace(true);
            result
        }
    });

    // SIGTERM / SIGINT stop the loop and the server.
    let signal_task = tokio::spawn({
        let client = client.clone();
        async move {
            if let Err(e) = shutdown_signal().await {
                tracing::error!("Failed to install signal handlers: {}", e);
            }
            client.stop();
            shutdown_tx.send_replace(true);
        }
    });

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader, http)?;

    // Build the router and run the server
    let router = build_router(state);
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let mut server_shutdown = shutdown_rx;
    let server_result = run_server(router, listen_addr, async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    })
    .await;

    // Stop the remaining tasks
    reload_notify.notify_one();
    signal_task.abort();
    client.stop();
    let poll_result = poll_task.await?;
    status_task.abort();

    server_result?;
    match poll_result {
        Ok(reason) => tracing::info!(?reason, "Poll loop stopped"),
        Err(e) => {
            tracing::error!("Poll loop failed: {}", e);
            return Err(e.into());
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pollcast_core=info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
