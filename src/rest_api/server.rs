//! Axum HTTP servers for probes and metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ControllerState;
use crate::{Error, Result};

use super::handlers;

/// Serve `/healthz` and `/readyz`
pub async fn run_probe_server(state: Arc<ControllerState>, addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Health probe server listening on {}", addr);
    serve(app, addr).await
}

/// Serve `/metrics`
pub async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http());

    info!("Metrics server listening on {}", addr);
    serve(app, addr).await
}

async fn serve(app: Router, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
