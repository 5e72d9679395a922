//! # HTTP Server
//!
//! HTTP server for metrics, health checks, and Kubernetes probes.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (200 once a snapshot has been published)
//! - `/snapshot` - Version and resource names of the snapshot served to Envoy
//!
//! The server runs on port 8090 by default (configurable via `-metrics-port`
//! or the `METRICS_PORT` environment variable).

use crate::observability::metrics;
use crate::xds::SnapshotCache;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
    pub cache: Arc<SnapshotCache>,
    pub node_id: String,
}

impl ServerState {
    pub fn new(cache: Arc<SnapshotCache>, node_id: &str) -> Self {
        Self {
            is_ready: Arc::new(AtomicBool::new(false)),
            cache,
            node_id: node_id.to_string(),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::Relaxed);
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/snapshot", get(snapshot_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(
    port: u16,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) && state.cache.snapshot(&state.node_id).is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn snapshot_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.cache.snapshot(&state.node_id) {
        Some(snapshot) => Json(snapshot.summary()).into_response(),
        None => (StatusCode::NOT_FOUND, "no snapshot published yet").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::Snapshot;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState::new(Arc::new(SnapshotCache::new()), "kube"))
    }

    #[tokio::test]
    async fn test_readyz_requires_ready_flag_and_snapshot() {
        let state = state();
        let status = readyz_handler(State(Arc::clone(&state))).await.into_response().status();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let status = readyz_handler(State(Arc::clone(&state))).await.into_response().status();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.cache.set_snapshot("kube", Snapshot::empty("1.0.0"));
        let status = readyz_handler(State(Arc::clone(&state))).await.into_response().status();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_snapshot_endpoint_before_publish() {
        let response = snapshot_handler(State(state())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_snapshot_endpoint_after_publish() {
        let state = state();
        state.cache.set_snapshot("kube", Snapshot::empty("3.0.0"));
        let response = snapshot_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
