#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;

use std::process;

use anyhow::Context;
use docket_server::{ServiceState, routes};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "docket_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "docket_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "docket_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    init_tracing();
    log_startup_info();
    cli.log();

    let config = cli.service_config().context("invalid configuration")?;
    let state = ServiceState::from_config(config).context("failed to create service state")?;

    // Lifecycle scheduler: startup expiry scan plus retention timers.
    let lifecycle = state.start();

    let router = routes(state.clone());
    let listener = tokio::net::TcpListener::bind(cli.server.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", cli.server.bind_addr()))?;

    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        addr = %cli.server.bind_addr(),
        "listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    lifecycle.await.ok();
    Ok(())
}

/// Resolves on ctrl-c and stops background work.
async fn shutdown_signal(state: ServiceState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %err,
            "failed to listen for shutdown signal"
        );
    }

    tracing::info!(
        target: TRACING_TARGET_SHUTDOWN,
        "shutdown requested, cancelling in-flight work"
    );
    state.shutdown();
}

/// Initializes tracing with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Logs startup information.
fn log_startup_info() {
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        "starting docket server"
    );

    tracing::debug!(
        target: TRACING_TARGET_STARTUP,
        pid = process::id(),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        "build information"
    );
}
