//! Beamgate application entry point.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Pick the VM provider (Hyperbeam, or the demo provider in demo mode)
//! 3. Build shared state and start the background sweeper
//! 4. Build router with gated API routes + security headers
//! 5. Serve until Ctrl+C or SIGTERM, then stop the sweeper

use beamgate::{
    auth::middleware::AppState,
    cleanup::spawn_sweeper,
    clock::SystemClock,
    config::Config,
    routes,
    vm::{DemoProvisioner, HyperbeamClient, VmProvisioner},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

fn provisioner(config: &Config) -> Arc<dyn VmProvisioner> {
    match (&config.hyperbeam_api_key, config.demo_mode) {
        (Some(api_key), false) => Arc::new(
            HyperbeamClient::new(api_key.clone(), config.upstream_timeout())
                .with_base_url(config.hyperbeam_base_url.clone()),
        ),
        _ => {
            tracing::warn!("Demo mode: sessions get placeholder VMs");
            Arc::new(DemoProvisioner)
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config from environment
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };
    tracing::info!("Starting beamgate on {}", config.bind_addr);
    tracing::debug!(config = ?config, "Loaded configuration");

    let bind_addr = config.bind_addr;
    let sweep_interval = config.sweep_interval();
    let provisioner = provisioner(&config);

    // Build shared state
    let state = AppState::new(config, Arc::new(SystemClock), provisioner);
    let sweeper = spawn_sweeper(state.clone(), sweep_interval);

    let app = routes::app(state);

    // Bind to configured address
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %bind_addr, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {}", bind_addr);

    // Start server (with_connect_info required for ConnectInfo<SocketAddr> extractors)
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    sweeper.shutdown().await;

    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
