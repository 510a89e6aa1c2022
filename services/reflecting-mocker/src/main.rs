//! Reflecting Mocker
//!
//! Test double for proxy and client test suites:
//! 1. Loads a list of reflecting endpoints from config
//! 2. Binds each to a TCP port or Unix socket
//! 3. Answers every request with a JSON description of that request
//! 4. Exposes an admin listener for runtime fault injection and metrics

mod admin;
mod config;
mod endpoint;
mod error;
mod metrics;
mod reflectors;

use anyhow::{Context, Result};
use handler::EndpointContext;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::endpoint::{Endpoint, EndpointLimits};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting reflecting-mocker");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let config_path = Config::resolve_path(cli_config_path(&args));
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        endpoints = config.endpoints.len(),
        admin = ?config.admin.as_ref().map(|a| a.listen_addr),
        max_connections = config.server.max_connections,
        max_body_bytes = config.server.max_body_bytes,
        "configuration loaded"
    );

    let endpoints = build_endpoints(&config)?;
    for endpoint in &endpoints {
        info!(
            endpoint_id = endpoint.context().endpoint_id(),
            transport = %endpoint.transport(),
            "endpoint configured"
        );
    }
    let contexts: Vec<Arc<EndpointContext>> =
        endpoints.iter().map(|e| e.context().clone()).collect();

    // Bind everything before serving anything so a bad address fails startup
    let mut bound = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        bound.push(endpoint.bind().await?);
    }

    let admin_listener = match &config.admin {
        Some(admin) => Some(
            TcpListener::bind(admin.listen_addr)
                .await
                .with_context(|| format!("failed to bind admin listener to {}", admin.listen_addr))?,
        ),
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = JoinSet::new();

    for endpoint in bound {
        info!(address = endpoint.local_addr(), "endpoint listening");
        servers.spawn(endpoint.serve(wait_for_shutdown(shutdown_rx.clone())));
    }

    if let Some(listener) = admin_listener {
        let addr = listener.local_addr()?;
        let app = build_admin_router(AdminState::new(contexts, prometheus_handle));
        let shutdown = wait_for_shutdown(shutdown_rx.clone());
        info!(%addr, "admin listener serving");
        servers.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
            Ok::<(), error::Error>(())
        });
    }

    info!(listeners = servers.len(), "running, accepting requests");

    // A listener failing before any signal is fatal for the whole process
    tokio::select! {
        _ = shutdown_signal() => {}
        Some(joined) = servers.join_next() => {
            match joined {
                Ok(Ok(())) => warn!("listener stopped unexpectedly, shutting down"),
                Ok(Err(e)) => error!(error = %e, "listener failed, shutting down"),
                Err(e) => error!(error = %e, "listener task panicked, shutting down"),
            }
        }
    }

    // The drain timeout starts when shutdown begins, not when the servers start
    let _ = shutdown_tx.send(true);
    let drain_timeout = Duration::from_secs(config.server.drain_timeout_secs);

    let drained = tokio::time::timeout(drain_timeout, async {
        while let Some(joined) = servers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "server error during shutdown"),
                Err(e) => error!(error = %e, "server task panicked"),
            }
        }
    })
    .await;

    match drained {
        Ok(()) => info!("all in-flight requests drained"),
        Err(_) => {
            warn!(
                remaining = servers.len(),
                drain_timeout_secs = drain_timeout.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
            servers.abort_all();
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Value following `--config`, if any.
fn cli_config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// One reflecting endpoint per config entry, each with its own context.
fn build_endpoints(config: &Config) -> Result<Vec<Endpoint>> {
    let limits = EndpointLimits {
        max_connections: config.server.max_connections,
        max_body_bytes: config.server.max_body_bytes,
    };

    config
        .endpoints
        .iter()
        .map(|entry| {
            let transport = entry
                .transport()
                .with_context(|| format!("invalid transport for endpoint `{}`", entry.id))?;
            let context = Arc::new(EndpointContext::with_flags(
                entry.id.clone(),
                entry.faults.clone(),
            ));
            Ok(reflectors::reflecting_endpoint(context, transport)
                .with_base_path(entry.base_path.clone())
                .with_limits(limits))
        })
        .collect()
}

/// Resolves once shutdown has been requested or the sender is gone.
fn wait_for_shutdown(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
