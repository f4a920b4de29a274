//! HTTP handlers for the probe and metrics endpoints

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, instrument};

use crate::controller::ControllerState;

use super::dto::{HealthResponse, ReadinessResponse};

/// Liveness probe; the process answering is enough
#[instrument]
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe; ready once the controller stream is running
#[instrument(skip(state))]
pub async fn readyz(
    State(state): State<Arc<ControllerState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let ready = state.ready.load(Ordering::Relaxed);
    let body = ReadinessResponse {
        ready,
        is_leader: state
            .leader_election
            .then(|| state.is_leader.load(Ordering::Relaxed)),
    };

    if ready {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

/// Prometheus scrape endpoint
pub async fn metrics() -> Result<String, StatusCode> {
    crate::controller::metrics::encode_metrics().map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
