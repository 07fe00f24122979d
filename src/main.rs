use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderName;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use windowgate::config::{LogOutput, LoggingConfig, WindowGateConfig};
use windowgate::http::{router, AdmissionState, HttpServer};
use windowgate::ratelimit::WindowLimiter;
use windowgate::store;

/// Sliding-window admission control backed by a shared key-value store.
#[derive(Parser, Debug)]
#[command(name = "windowgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = WindowGateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Windowgate Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = config.limiter.settings()?;
    let client_key_header = config
        .http
        .client_key_header
        .as_deref()
        .map(HeaderName::try_from)
        .transpose()?;

    info!(
        http_addr = %config.server.http_addr,
        window_secs = settings.window_size.as_secs(),
        max_requests = settings.max_requests,
        compaction_secs = settings.compaction_interval.as_secs(),
        consistency = ?settings.consistency,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    if args.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    // One store handle for the lifetime of the process
    let store = store::connect(&config.store).await?;
    let limiter = Arc::new(WindowLimiter::new(store, settings)?);
    info!("Window limiter initialized");

    let state = AdmissionState::new(limiter).with_client_key_header(client_key_header);
    let server = HttpServer::new(config.server.http_addr, router(state));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Windowgate Admission Service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogOutput::Json => builder.json().init(),
        LogOutput::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
