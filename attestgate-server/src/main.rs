//! Attestgate server binary
//!
//! Loads configuration from the environment, connects attestation storage
//! and serves the REST API until SIGINT/SIGTERM.

use std::net::SocketAddr;

use anyhow::Context;
use attestgate_core::{spawn_challenge_sweeper, AttestationConfig};
use attestgate_server::{create_router_with_config, AppState, Config, LogFormat};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "attestgate=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(config.log_format);

    let attestation =
        AttestationConfig::from_env().context("invalid attestation configuration")?;
    tracing::info!(
        enabled = attestation.enabled,
        storage = ?attestation.storage,
        "Loaded attestation configuration"
    );

    // App Attest chain validation is supplied by deployments embedding the
    // library; with iOS configured this binary refuses to start
    let state = AppState::from_config(&attestation, None)
        .await
        .context("failed to initialise attestation state")?;

    let sweeper = spawn_challenge_sweeper(
        state.verifier.storage().challenges.clone(),
        attestation.sweep_interval,
    );

    let app = create_router_with_config(state, &config);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Attestgate server listening (docs at /api-docs/openapi.json)");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
