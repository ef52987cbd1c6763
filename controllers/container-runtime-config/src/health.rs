//! Health checks and Prometheus metrics over HTTP.
//!
//! - `GET /healthz` - process is up
//! - `GET /readyz` - caches have synced and workers are running
//! - `GET /metrics` - Prometheus text exposition

use crate::error::ControllerError;
use crate::metrics::Metrics;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared with the handlers
#[derive(Clone)]
pub struct HealthState {
    pub ready: Arc<AtomicBool>,
    pub metrics: Arc<Metrics>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "caches not synced")
    }
}

async fn metrics(State(state): State<HealthState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health endpoints on `addr` until the process exits
pub async fn serve(addr: SocketAddr, state: HealthState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|source| ControllerError::Io {
        path: addr.to_string(),
        source,
    })?;
    info!("Serving health checks and metrics on {}", addr);

    axum::serve(listener, router(state)).await.map_err(|source| ControllerError::Io {
        path: addr.to_string(),
        source,
    })
}
