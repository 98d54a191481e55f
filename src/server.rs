// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP endpoints: Prometheus metrics and liveness/readiness probes.
//!
//! Both run on their own listener so that probes keep answering while a
//! scrape is slow, and both stop gracefully on shutdown.

use crate::constants::{HEALTHZ_PATH, METRICS_SERVER_PATH, READYZ_PATH};
use crate::metrics::MetricsRecorder;
use crate::shutdown::{self, ShutdownSignal};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Content type of the Prometheus text exposition format
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Router serving `GET /metrics`.
pub fn metrics_router(metrics: Arc<MetricsRecorder>) -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .with_state(metrics)
}

/// Router serving `GET /healthz` and `GET /readyz`.
pub fn probe_router() -> Router {
    Router::new()
        .route(HEALTHZ_PATH, get(probe_handler))
        .route(READYZ_PATH, get(probe_handler))
}

async fn probe_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(metrics): State<Arc<MetricsRecorder>>) -> Response {
    match metrics.gather() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve `router` on `listener` until shutdown.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    name: &'static str,
    mut stop: ShutdownSignal,
) {
    match listener.local_addr() {
        Ok(addr) => info!(server = name, addr = %addr, "HTTP server started"),
        Err(e) => error!(server = name, error = %e, "HTTP server started on unknown address"),
    }

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown::wait(&mut stop).await })
        .await;

    match result {
        Ok(()) => info!(server = name, "HTTP server stopped"),
        Err(e) => error!(server = name, error = %e, "HTTP server error"),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
