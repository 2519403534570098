// Copyright 2025 Snoindex Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Health and metrics endpoints served next to a running service.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::queue::MessageQueue;
use crate::telemetry::ServiceMetrics;

#[derive(Clone)]
pub struct HealthState {
    pub service: String,
    pub queue: Arc<dyn MessageQueue>,
    pub metrics: Arc<ServiceMetrics>,
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Deep check: the source queue must answer.
async fn healthz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.queue.exists().await {
        Ok(true) => (StatusCode::OK, "OK".to_string()),
        Ok(false) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("queue {} missing", state.queue.name()),
        ),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("ERR: {}", e)),
    }
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(&state.service),
    )
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind `0.0.0.0:{port}` and serve in a background task.
pub async fn spawn_health_server(
    port: u16,
    state: HealthState,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health: serving /health, /healthz and /metrics");
    let app = router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = ?e, "health: server failed");
        }
    }))
}
